//! PTY lifecycle: spawning the child under a pseudo-terminal sized to the
//! host, feeding it input, draining its output, and tearing it down with
//! an escalating signal sequence.

use std::io::Read;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::Context;
use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::error::BridgeError;
use crate::error::Result;

/// Bytes per master read.
const READ_CHUNK_SIZE: usize = 8192;
/// Buffered output chunks before the reader thread backpressures.
const OUTPUT_QUEUE_DEPTH: usize = 64;
/// Pause between SIGHUP, SIGTERM and SIGKILL during shutdown.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Host terminal size, with the conventional 24×80 fallback when stdout
/// is not a tty.
pub fn host_winsize() -> PtySize {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc != 0 || ws.ws_row == 0 || ws.ws_col == 0 {
        return PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        };
    }
    PtySize {
        rows: ws.ws_row,
        cols: ws.ws_col,
        pixel_width: ws.ws_xpixel,
        pixel_height: ws.ws_ypixel,
    }
}

/// Resolves the program name the way a shell would, with one extension:
/// a bare name that is not on `PATH` but exists as an executable in `cwd`
/// resolves to `./name`. Running local scripts without the `./` prefix is
/// a common trap otherwise.
fn resolve_program_in(name: &str, path_var: Option<&str>, cwd: &Path) -> String {
    if name.contains('/') {
        return name.to_string();
    }
    let on_path = path_var
        .unwrap_or_default()
        .split(':')
        .filter(|dir| !dir.is_empty())
        .any(|dir| is_executable(&Path::new(dir).join(name)));
    if on_path {
        return name.to_string();
    }
    let local = cwd.join(name);
    if is_executable(&local) {
        return format!("./{name}");
    }
    name.to_string()
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|md| md.is_file() && md.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

pub fn resolve_program(name: &str) -> String {
    let cwd = std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf());
    let path_var = std::env::var("PATH").ok();
    resolve_program_in(name, path_var.as_deref(), &cwd)
}

/// A child process running under a PTY. The session exclusively owns the
/// master side; output is drained by a blocking reader thread into a
/// bounded queue, writes go through [`PtySession::write`], and the exit
/// code arrives on the receiver from [`PtySession::take_exit`].
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    writer: Arc<StdMutex<Box<dyn Write + Send>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    child_pid: Option<u32>,
    exited: Arc<AtomicBool>,
    output_rx: Option<mpsc::Receiver<Vec<u8>>>,
    exit_rx: Option<oneshot::Receiver<i32>>,
}

// SAFETY: every field's methods only ever run while the caller holds the
// `tokio::sync::Mutex<PtySession>` in `bridge.rs`, so concurrent access
// never actually occurs; the underlying trait objects just aren't
// declared `Sync` upstream.
unsafe impl Sync for PtySession {}

impl PtySession {
    /// Forks `command` under a fresh PTY sized to the host terminal.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| BridgeError::config("no command given"))?;
        let display = command.join(" ");

        let pty_system = native_pty_system();
        let size = host_winsize();
        let pair = pty_system
            .openpty(size)
            .context("allocating PTY pair")
            .map_err(|err| BridgeError::spawn(&display, err))?;

        let mut builder = CommandBuilder::new(resolve_program(program));
        builder.args(args);
        if let Ok(cwd) = std::env::current_dir() {
            builder.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .context("spawning child in PTY")
            .map_err(|err| BridgeError::spawn(&display, err))?;
        let killer = child.clone_killer();
        let child_pid = child.process_id();

        let mut reader = pair
            .master
            .try_clone_reader()
            .context("cloning PTY reader")
            .map_err(|err| BridgeError::spawn(&display, err))?;
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_QUEUE_DEPTH);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    // EIO on the master is the conventional child-exit signal.
                    Err(_) => break,
                }
            }
        });

        let writer = pair
            .master
            .take_writer()
            .context("taking PTY writer")
            .map_err(|err| BridgeError::spawn(&display, err))?;
        let writer = Arc::new(StdMutex::new(writer));

        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let exited = Arc::new(AtomicBool::new(false));
        let wait_exited = Arc::clone(&exited);
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(_) => -1,
            };
            wait_exited.store(true, Ordering::SeqCst);
            let _ = exit_tx.send(code);
        });

        Ok(Self {
            master: pair.master,
            writer,
            killer,
            child_pid,
            exited,
            output_rx: Some(output_rx),
            exit_rx: Some(exit_rx),
        })
    }

    /// Hands the output queue to the router. Single consumer; callable once.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.output_rx.take()
    }

    /// Hands the exit notification to the supervisor. Callable once.
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<i32>> {
        self.exit_rx.take()
    }

    pub fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    /// Writes one atomic group of bytes to the child's input.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.write_all(&bytes)?;
            guard.flush()
        })
        .await
        .map_err(|err| BridgeError::pty_io(std::io::Error::other(err)))?
        .map_err(BridgeError::pty_io)
    }

    /// Re-applies the host terminal size to the PTY and nudges the child.
    pub fn resize_to_host(&self) {
        let size = host_winsize();
        if let Err(err) = self.master.resize(size) {
            tracing::debug!(%err, "PTY resize failed");
            return;
        }
        self.signal(libc::SIGWINCH);
    }

    /// Best-effort signal delivery to the child.
    pub fn signal(&self, sig: i32) {
        if let Some(pid) = self.child_pid {
            unsafe {
                libc::kill(pid as libc::pid_t, sig);
            }
        }
    }

    /// Terminates the child: SIGHUP, then SIGTERM after a grace window,
    /// then SIGKILL. Returns once the child is gone or the kill was issued.
    pub async fn shutdown(&mut self) {
        for sig in [libc::SIGHUP, libc::SIGTERM] {
            if !self.is_alive() {
                return;
            }
            self.signal(sig);
            tokio::time::sleep(KILL_GRACE).await;
        }
        if self.is_alive() {
            let _ = self.killer.kill();
        }
    }
}
