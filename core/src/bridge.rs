//! Session wiring: one child process, one authorized peer, and the tasks
//! that connect them.
//!
//! The supervisor owns shutdown: child exit, SIGINT/SIGTERM, `/quit`, or
//! a fatal router error all converge on the same once-only sequence —
//! cancel the other tasks, escalate signals at the child, say goodbye on
//! the chat side, and restore the host terminal.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Duration;

use crate::error::BridgeError;
use crate::error::Result;
use crate::keymap;
use crate::pty::PtySession;
use crate::restore;
use crate::router::OutputRouter;
use crate::router::RouterExit;
use crate::source::OutputSource;
use crate::telegram::TelegramClient;
use crate::telegram::TelegramClientWithPeer;

/// How long the supervisor waits for the router to finish draining.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause before re-polling after a transport error.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

const GOODBYE_MESSAGE: &str = "Session ended.";

pub struct BridgeOptions {
    pub command: Vec<String>,
    pub token: String,
    pub chat_id: i64,
    pub mirror: bool,
    pub append_enter: bool,
    pub output_stream: Option<PathBuf>,
}

/// Inbound messages the bridge consumes instead of forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reserved {
    Quit,
    Help,
}

fn reserved_command(text: &str) -> Option<Reserved> {
    match text.trim() {
        "/quit" => Some(Reserved::Quit),
        "/help" => Some(Reserved::Help),
        _ => None,
    }
}

/// Runs the bridge to completion. Terminal restoration runs on every exit
/// path, including the error ones.
pub async fn run(options: BridgeOptions) -> Result<()> {
    restore::init(options.mirror);
    let result = run_inner(options).await;
    restore::teardown();
    result
}

async fn run_inner(options: BridgeOptions) -> Result<()> {
    let client = Arc::new(TelegramClientWithPeer {
        client: TelegramClient::new(&options.token)?,
        chat_id: options.chat_id,
    });

    let mut session = PtySession::spawn(&options.command)?;
    tracing::info!(command = %options.command.join(" "), "child spawned under PTY");

    let pty_output = session
        .take_output()
        .ok_or_else(|| BridgeError::config("PTY output already taken"))?;
    let mut child_exit = session
        .take_exit()
        .ok_or_else(|| BridgeError::config("PTY exit channel already taken"))?;
    let session = Arc::new(Mutex::new(session));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);

    // In file-tail mode the PTY must still be drained or the child stalls
    // once the kernel buffer fills; its bytes then feed the mirror only.
    let (source, pty_drain) = match &options.output_stream {
        Some(path) => {
            let source = OutputSource::file(path.clone());
            let mirror = options.mirror;
            let mut drain = pty_output;
            let handle = tokio::spawn(async move {
                use std::io::Write;
                let mut stdout = std::io::stdout();
                while let Some(bytes) = drain.recv().await {
                    if mirror {
                        let _ = stdout.write_all(&bytes);
                        let _ = stdout.flush();
                    }
                }
            });
            (source, Some(handle))
        }
        None => (OutputSource::pty(pty_output), None),
    };

    let mirror_writer: Option<Box<dyn std::io::Write + Send>> =
        (options.mirror && options.output_stream.is_none())
            .then(|| Box::new(std::io::stdout()) as Box<dyn std::io::Write + Send>);

    let router = OutputRouter::new(source, Arc::clone(&client), mirror_writer, shutdown_rx.clone());
    let mut router_handle = tokio::spawn(router.run());

    let inbound_handle = tokio::spawn(inbound_loop(
        Arc::clone(&client),
        Arc::clone(&session),
        quit_tx,
        shutdown_rx,
        options.append_enter,
    ));

    let mut sigint = signal(SignalKind::interrupt()).map_err(BridgeError::pty_io)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(BridgeError::pty_io)?;
    let mut sigwinch = signal(SignalKind::window_change()).map_err(BridgeError::pty_io)?;

    // Supervisor: wait for whichever shutdown trigger fires first.
    let mut router_exit: Option<RouterExit> = None;
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::debug!("SIGINT received");
                break;
            }
            _ = sigterm.recv() => {
                tracing::debug!("SIGTERM received");
                break;
            }
            _ = sigwinch.recv() => {
                session.lock().await.resize_to_host();
            }
            code = &mut child_exit => {
                tracing::info!(code = code.unwrap_or(-1), "child exited");
                break;
            }
            _ = quit_rx.recv() => {
                tracing::debug!("/quit received");
                break;
            }
            exit = &mut router_handle => {
                tracing::warn!(?exit, "router stopped before the child");
                router_exit = exit.ok();
                break;
            }
        }
    }

    // Once-only orchestrated shutdown.
    let _ = shutdown_tx.send(true);

    session.lock().await.shutdown().await;

    if !router_handle.is_finished() {
        if let Ok(Ok(exit)) = tokio::time::timeout(DRAIN_TIMEOUT, &mut router_handle).await {
            router_exit = Some(exit);
        }
    }
    inbound_handle.abort();
    if let Some(handle) = pty_drain {
        handle.abort();
    }

    if let Err(err) = client.client.send_message(client.chat_id, GOODBYE_MESSAGE).await {
        tracing::debug!(%err, "goodbye message not delivered");
    }

    if router_exit == Some(RouterExit::Fatal) {
        return Err(BridgeError::pty_io(std::io::Error::other(
            "output source failed",
        )));
    }
    Ok(())
}

/// Receives chat messages, filters by the authorized peer, and feeds the
/// input translator. Transport errors back off and retry; they never end
/// the session.
async fn inbound_loop(
    client: Arc<TelegramClientWithPeer>,
    session: Arc<Mutex<PtySession>>,
    quit_tx: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
    append_enter: bool,
) {
    loop {
        let updates = tokio::select! {
            updates = client.client.poll_updates() => updates,
            _ = shutdown.changed() => return,
        };
        let updates = match updates {
            Ok(updates) => updates,
            Err(err) => {
                tracing::debug!(%err, "update poll failed; retrying");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            let Some((sender, text)) = update.text_message() else {
                continue;
            };
            if sender != client.chat_id {
                tracing::debug!(sender, "ignoring message from unauthorized peer");
                continue;
            }
            match reserved_command(text) {
                Some(Reserved::Quit) => {
                    let _ = quit_tx.send(()).await;
                    return;
                }
                Some(Reserved::Help) => {
                    if let Err(err) = client
                        .client
                        .send_plain(client.chat_id, &keymap::help_text())
                        .await
                    {
                        tracing::debug!(%err, "help reply not delivered");
                    }
                }
                None => {
                    let translation = keymap::translate(text, append_enter);
                    if translation.truncated {
                        tracing::warn!("inbound message exceeded the input ceiling; truncated");
                    }
                    let session = session.lock().await;
                    for write in translation.writes {
                        if let Err(err) = session.write(write).await {
                            tracing::warn!(%err, "PTY write failed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Discover-my-id mode: report the sender id of the first inbound message
/// and exit.
pub async fn run_register(token: &str) -> Result<()> {
    let client = TelegramClient::new(token)?;
    println!("Send any message to the bot to discover your chat id...");
    loop {
        let updates = match client.poll_updates().await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::debug!(%err, "update poll failed; retrying");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };
        for update in updates {
            let Some((sender, _)) = update.text_message() else {
                continue;
            };
            println!("chat id: {sender}");
            if let Err(err) = client
                .send_message(sender, &format!("Your chat id is {sender}"))
                .await
            {
                tracing::debug!(%err, "registration reply not delivered");
            }
            return Ok(());
        }
    }
}
