//! End-to-end pipeline checks against real children under real PTYs.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use telepty_core::Result;
use telepty_core::keymap;
use telepty_core::pty::PtySession;
use telepty_core::router::OutputRouter;
use telepty_core::source::OutputSource;
use telepty_core::telegram::MessageSink;
use tokio::sync::watch;
use tokio::time::Duration;

#[derive(Clone, Default)]
struct CollectingSink {
    sent: Arc<StdMutex<Vec<String>>>,
}

impl CollectingSink {
    fn messages(&self) -> Vec<String> {
        self.sent.lock().expect("sink lock").clone()
    }
}

impl MessageSink for CollectingSink {
    fn send(&self, text: String) -> impl Future<Output = Result<()>> + Send {
        let sent = Arc::clone(&self.sent);
        async move {
            sent.lock().expect("sink lock").push(text);
            Ok(())
        }
    }
}

async fn wait_for_message(sink: &CollectingSink, needle: &str) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(found) = sink
            .messages()
            .into_iter()
            .find(|message| message.contains(needle))
        {
            return found;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no message containing {needle:?}; got {:?}",
            sink.messages()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn literal_echo_round_trips_through_the_pty() {
    let mut session = PtySession::spawn(&["/bin/cat".to_string()]).expect("spawn cat");
    let output = session.take_output().expect("output queue");
    let _exit = session.take_exit().expect("exit channel");

    let sink = CollectingSink::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let router = OutputRouter::new(OutputSource::pty(output), sink.clone(), None, shutdown_rx);
    let router_handle = tokio::spawn(router.run());

    let translation = keymap::translate("hello", true);
    for write in translation.writes {
        session.write(write).await.expect("pty write");
    }

    let message = wait_for_message(&sink, "hello").await;
    assert!(message.contains("hello"));

    session.shutdown().await;
    let _ = shutdown_tx.send(true);
    router_handle.await.expect("router task");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ctrl_c_reaches_the_child_as_sigint() {
    let mut session = PtySession::spawn(&["/bin/cat".to_string()]).expect("spawn cat");
    let _output = session.take_output().expect("output queue");
    let exit = session.take_exit().expect("exit channel");

    let translation = keymap::translate("/c c", false);
    assert_eq!(translation.writes, vec![vec![0x03]]);
    for write in translation.writes {
        session.write(write).await.expect("pty write");
    }

    // The PTY line discipline turns 0x03 into SIGINT for the foreground
    // child; cat exits without any explicit kill from our side.
    tokio::time::timeout(Duration::from_secs(5), exit)
        .await
        .expect("child exits after ^C")
        .expect("exit code delivered");
    assert!(!session.is_alive());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_tail_mode_bridges_only_the_side_channel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let side = dir.path().join("side.log");
    let script = format!(
        "echo pty-noise; echo clean-line >> {}; sleep 2",
        side.display()
    );
    let mut session = PtySession::spawn(&[
        "/bin/sh".to_string(),
        "-c".to_string(),
        script,
    ])
    .expect("spawn sh");
    // PTY output is irrelevant here; the router reads the side channel.
    let _pty_output = session.take_output().expect("output queue");
    let _exit = session.take_exit().expect("exit channel");

    let sink = CollectingSink::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let router = OutputRouter::new(
        OutputSource::file(side.clone()),
        sink.clone(),
        None,
        shutdown_rx,
    );
    let router_handle = tokio::spawn(router.run());

    let message = wait_for_message(&sink, "clean-line").await;
    assert!(!message.contains("pty-noise"));
    assert!(sink.messages().iter().all(|m| !m.contains("pty-noise")));

    let _ = shutdown_tx.send(true);
    router_handle.await.expect("router task");
    session.shutdown().await;
}
