use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::thread;

use dialoguer::console::style;
use tokio::sync::oneshot;
use tracing::debug;

use super::error::ManualEntryError;
use super::payload::decode_pasted;
use super::ChannelOutcome;

pub const PASTE_PROMPT: &str = "Paste token from browser to log in:";

/// Blocking source of operator input.
pub trait LineReader: Send + Sync {
    fn read_line(&self, prompt: &str) -> io::Result<String>;
}

/// Reads one line from stdin.
///
/// The read stays in cooked mode even on a TTY: a pending read may be
/// abandoned when the browser callback wins, and a raw-mode key reader left
/// behind would leave the terminal unusable.
pub struct TerminalLineReader;

impl LineReader for TerminalLineReader {
    fn read_line(&self, prompt: &str) -> io::Result<String> {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            let mut stderr = io::stderr();
            write!(stderr, "{} {} ", style("?").yellow(), style(prompt).bold())?;
            stderr.flush()?;
        }

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed before a token was pasted",
            ));
        }
        Ok(line)
    }
}

/// A single pending paste, read on its own thread.
///
/// Dropping the channel abandons the read: the thread stays parked on stdin
/// until the process exits, and whatever it eventually reads is discarded.
pub struct ManualEntryChannel {
    rx: oneshot::Receiver<io::Result<String>>,
}

impl ManualEntryChannel {
    pub fn spawn(reader: Arc<dyn LineReader>, prompt: &str) -> Self {
        let (tx, rx) = oneshot::channel();
        let prompt = prompt.to_string();

        let spawned = thread::Builder::new()
            .name("manual-entry".into())
            .spawn(move || {
                let line = reader.read_line(&prompt);
                if tx.send(line).is_err() {
                    debug!("pasted token arrived after the login finished; discarding");
                }
            });

        match spawned {
            Ok(_) => Self { rx },
            Err(err) => {
                // tx went away with the closure; surface the spawn failure instead
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(err));
                Self { rx }
            }
        }
    }

    /// Resolve once the operator has entered a line.
    pub async fn await_input(self) -> ChannelOutcome<ManualEntryError> {
        let line = match self.rx.await {
            Ok(Ok(line)) => line,
            Ok(Err(err)) => return ChannelOutcome::Failed(ManualEntryError::Input(err)),
            Err(_) => {
                return ChannelOutcome::Failed(ManualEntryError::Input(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "input reader exited without a result",
                )))
            }
        };

        match decode_pasted(&line) {
            Ok(payload) => ChannelOutcome::Delivered(payload),
            Err(err) => ChannelOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io;
    use std::sync::mpsc;
    use std::sync::Mutex;

    use super::LineReader;

    /// Returns a fixed line immediately.
    pub struct FixedLine(pub String);

    impl LineReader for FixedLine {
        fn read_line(&self, _prompt: &str) -> io::Result<String> {
            Ok(self.0.clone())
        }
    }

    /// Stdin that is already at end of file.
    pub struct ClosedInput;

    impl LineReader for ClosedInput {
        fn read_line(&self, _prompt: &str) -> io::Result<String> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"))
        }
    }

    /// Blocks until the test releases it, like an operator who never pastes.
    pub struct GatedLine {
        release: Mutex<mpsc::Receiver<String>>,
    }

    impl GatedLine {
        pub fn new() -> (Self, mpsc::Sender<String>) {
            let (tx, rx) = mpsc::channel();
            (
                Self {
                    release: Mutex::new(rx),
                },
                tx,
            )
        }
    }

    impl LineReader for GatedLine {
        fn read_line(&self, _prompt: &str) -> io::Result<String> {
            let release = self
                .release
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            release
                .recv()
                .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "gate dropped"))
        }
    }
}
