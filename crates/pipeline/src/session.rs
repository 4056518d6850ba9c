//! Adapter Session.
//!
//! One session is one adapter tool process running one command script.
//! The session owns the child; dropping it kills and reaps the child if it
//! is still running, so no exit path leaves the adapter held open.

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::error::PipelineError;

/// A running adapter tool process.
pub struct AdapterSession {
    program: PathBuf,
    child: Child,
    lines: Receiver<String>,
    readers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl AdapterSession {
    /// Spawn `command` with stdout and stderr captured.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AdapterUnavailable`] when the tool cannot be started.
    pub fn open(mut command: Command) -> Result<Self, PipelineError> {
        let program = PathBuf::from(command.get_program());
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::AdapterUnavailable(format!(
                    "failed to start {}: {e}",
                    program.display()
                ))
            })?;

        let (tx, rx) = channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx));
        }

        tracing::debug!(pid = child.id(), tool = %program.display(), "adapter session opened");
        Ok(Self {
            program,
            child,
            lines: rx,
            readers,
            closed: false,
        })
    }

    /// OS process id of the adapter tool.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Output lines from stdout and stderr, interleaved in arrival order.
    ///
    /// Ends once the tool has closed both streams.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.lines.iter()
    }

    /// Wait for the tool to exit and close the session.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AdapterUnavailable`] if the process cannot be waited on.
    pub fn wait(mut self) -> Result<ExitStatus, PipelineError> {
        let status = self.child.wait().map_err(|e| {
            PipelineError::AdapterUnavailable(format!(
                "lost track of {}: {e}",
                self.program.display()
            ))
        });
        self.close();
        let status = status?;
        tracing::debug!(%status, "adapter session closed");
        Ok(status)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        // Still running only when the caller bailed out early.
        if !matches!(self.child.try_wait(), Ok(Some(_))) {
            tracing::warn!(pid = self.child.id(), "tearing down adapter session");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        self.closed = true;
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut listening = true;
        // Keep reading to EOF even once nobody listens, so the tool never
        // writes into a closed pipe.
        while let Ok(Some(line)) = read_line_lossy(&mut reader, &mut buf) {
            if listening {
                listening = tx.send(line).is_ok();
            }
        }
    })
}

/// Next line of `reader` without its terminator, `None` at EOF.
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream.
pub(crate) fn read_line_lossy(
    reader: &mut impl BufRead,
    buf: &mut Vec<u8>,
) -> io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(|c: char| c == '\n' || c == '\r').to_string()))
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn test_collects_both_streams() {
        let session = AdapterSession::open(sh("echo out; echo err >&2")).unwrap();
        let mut lines: Vec<String> = session.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert!(session.wait().unwrap().success());
    }

    #[test]
    fn test_reports_failed_exit() {
        let session = AdapterSession::open(sh("echo 'Error: open failed' >&2; exit 1")).unwrap();
        let lines: Vec<String> = session.lines().collect();
        assert_eq!(lines, vec!["Error: open failed".to_string()]);
        assert!(!session.wait().unwrap().success());
    }

    #[test]
    fn test_invalid_utf8_does_not_stop_the_stream() {
        let session = AdapterSession::open(sh(
            "printf 'Info : path \\377\\n' >&2; echo 'shutdown command invoked' >&2",
        ))
        .unwrap();
        let lines: Vec<String> = session.lines().collect();
        assert_eq!(lines.len(), 2, "{lines:?}");
        assert!(lines[0].starts_with("Info : path "));
        assert_eq!(lines[1], "shutdown command invoked");
        assert!(session.wait().unwrap().success());
    }

    #[test]
    fn test_read_line_lossy_strips_terminators() {
        let mut reader = io::Cursor::new(b"a\r\nb\xff\nc".to_vec());
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while let Some(line) = read_line_lossy(&mut reader, &mut buf).unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["a".to_string(), "b\u{fffd}".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_missing_tool_is_adapter_unavailable() {
        let result = AdapterSession::open(Command::new("/nonexistent/openocd"));
        assert!(matches!(result, Err(PipelineError::AdapterUnavailable(_))));
    }

    #[test]
    fn test_drop_kills_running_tool() {
        let session = AdapterSession::open(sh("exec sleep 30")).unwrap();
        let pid = session.id();
        drop(session);
        let alive = Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success(), "adapter tool {pid} still running");
    }
}
