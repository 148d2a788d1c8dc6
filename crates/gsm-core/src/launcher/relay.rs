//! Console input relay for foreground servers.
//!
//! The child's stdin has exactly one owner: a relay thread that receives
//! console lines over a channel and writes them in arrival order. Endpoint
//! client threads and the launcher's own teardown only ever hold a sender.
//!
//! The relay has its own stop token, separate from the launch token, so it
//! is still running when teardown writes the final `stop` line.

use crate::cancel::CancellationToken;
use crate::error::{Result, SupervisorError};
use std::io::Write;
use std::process::ChildStdin;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const RECV_TIMEOUT: Duration = Duration::from_millis(200);

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Owner of a child's stdin.
pub struct StdinRelay {
    sender: Sender<String>,
    thread: Option<JoinHandle<()>>,
    done: CancellationToken,
}

impl StdinRelay {
    /// Start relaying into `stdin` on a fresh channel.
    pub fn spawn<W>(server: &str, stdin: W) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<String>();
        Self::with_channel(server, stdin, sender, receiver)
    }

    /// Start relaying lines from `receiver` into `stdin` until [`stop`] is
    /// called or every sender has been dropped.
    ///
    /// Lines queued on `sender` before the relay starts are written first.
    ///
    /// [`stop`]: Self::stop
    pub fn with_channel<W>(
        server: &str,
        stdin: W,
        sender: Sender<String>,
        receiver: Receiver<String>,
    ) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let done = CancellationToken::new();
        let relay_done = done.clone();
        let thread = thread::Builder::new()
            .name(format!("gsm-stdin-{}", server))
            .spawn(move || {
                let mut stdin = stdin;
                loop {
                    match receiver.recv_timeout(RECV_TIMEOUT) {
                        Ok(line) => {
                            let line = line.trim_end_matches(['\r', '\n']);
                            let written = stdin
                                .write_all(line.as_bytes())
                                .and_then(|_| stdin.write_all(LINE_ENDING.as_bytes()))
                                .and_then(|_| stdin.flush());
                            if let Err(e) = written {
                                warn!("Failed to write to server stdin: {}", e);
                                break;
                            }
                            debug!("Relayed console line: {}", line);
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if relay_done.is_cancelled() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Stdin relay exited");
            })
            .map_err(SupervisorError::from)?;

        Ok(Self {
            sender,
            thread: Some(thread),
            done,
        })
    }

    /// A sender feeding this relay.
    pub fn sender(&self) -> Sender<String> {
        self.sender.clone()
    }

    /// Queue one console line. `false` once the relay thread has exited.
    pub fn send(&self, line: &str) -> bool {
        self.sender.send(line.to_string()).is_ok()
    }

    /// Stop the relay thread and wait for it.
    pub fn stop(&mut self) {
        self.done.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StdinRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_relays_lines_in_order() {
        let buf = SharedBuf::default();
        let mut relay = StdinRelay::spawn("alpha", buf.clone()).unwrap();

        assert!(relay.send("say hello"));
        let sender = relay.sender();
        sender.send("list\n".to_string()).unwrap();
        drop(sender);

        std::thread::sleep(Duration::from_millis(300));
        relay.stop();

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, format!("say hello{}list{}", LINE_ENDING, LINE_ENDING));
    }

    #[test]
    fn test_stop_joins_thread() {
        let mut relay = StdinRelay::spawn("alpha", SharedBuf::default()).unwrap();
        relay.stop();
        assert!(relay.done.is_cancelled());
        assert!(relay.thread.is_none());
        assert!(!relay.send("late"));
    }

    #[test]
    fn test_writes_lines_queued_before_start() {
        let buf = SharedBuf::default();
        let (sender, receiver) = mpsc::channel();
        sender.send("early".to_string()).unwrap();

        let mut relay = StdinRelay::with_channel("alpha", buf.clone(), sender, receiver).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        relay.stop();

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, format!("early{}", LINE_ENDING));
    }

    #[test]
    fn test_accepts_lines_until_stopped() {
        let buf = SharedBuf::default();
        let mut relay = StdinRelay::spawn("alpha", buf.clone()).unwrap();

        // Idle well past the receive timeout; the relay must still be live
        std::thread::sleep(RECV_TIMEOUT * 2);
        assert!(relay.send("stop"));

        std::thread::sleep(Duration::from_millis(100));
        relay.stop();
        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, format!("stop{}", LINE_ENDING));
    }
}
