use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ToolchainError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of a finished child process.
#[derive(Debug)]
pub(crate) struct Captured {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs `command` to completion, feeding it `stdin` and capturing both
/// output streams.
///
/// The timeout covers the whole call: waiting for the child and reading its
/// output until both pipes close. Background processes left behind by the
/// child keep the pipes open, so on unix the child gets its own process group
/// and the whole group is killed once the deadline passes.
pub(crate) fn run(
    mut command: Command,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
) -> Result<Captured, ToolchainError> {
    let program = command.get_program().to_string_lossy().into_owned();

    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    tracing::debug!("spawning {:?}", command);

    let start = Instant::now();
    let deadline = timeout.map(|timeout| start + timeout);
    let timed_out = |program: String| ToolchainError::Timeout {
        program,
        millis: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
    };

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ToolchainError::NotFound(program.clone()),
        _ => ToolchainError::Spawn(program.clone(), e),
    })?;

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        thread::spawn(move || {
            // Dropping the pipe afterwards closes the child's stdin.
            let _ = pipe.write_all(&bytes);
        });
    }

    let (sender, receiver) = mpsc::channel();
    let mut pending = 0;
    pending += drain(child.stdout.take(), Stream::Stdout, &sender);
    pending += drain(child.stderr.take(), Stream::Stderr, &sender);
    drop(sender);

    let status = match wait(&mut child, deadline) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child);
            return Err(timed_out(program));
        }
        Err(e) => {
            terminate(&mut child);
            return Err(ToolchainError::Spawn(program, e));
        }
    };

    let mut stdout = String::new();
    let mut stderr = String::new();

    for _ in 0..pending {
        let received = match deadline {
            Some(deadline) => receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok((Stream::Stdout, output)) => stdout = output,
            Ok((Stream::Stderr, output)) => stderr = output,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("'{}' exited but its output stayed open past the deadline", program);
                terminate(&mut child);
                return Err(timed_out(program));
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(Captured {
        status,
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

/// Waits for the child, giving up at the deadline. `Ok(None)` means the
/// deadline passed.
fn wait(child: &mut Child, deadline: Option<Instant>) -> std::io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Kills the child together with everything it started.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own process group, see `run`.
        let _ = Command::new("kill")
            .args(["-KILL", "--", &format!("-{}", child.id())])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Reads `pipe` to the end on a separate thread and sends the text back.
/// Returns how many results to expect.
fn drain<R>(pipe: Option<R>, stream: Stream, sender: &Sender<(Stream, String)>) -> usize
where
    R: Read + Send + 'static,
{
    let Some(mut pipe) = pipe else {
        return 0;
    };

    let sender = sender.clone();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        let _ = sender.send((stream, String::from_utf8_lossy(&buffer).into_owned()));
    });

    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_captures_output() {
        let out = run(sh("echo out; echo err >&2; exit 3"), None, None).unwrap();

        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[test]
    fn test_feeds_stdin() {
        let out = run(sh("cat"), Some(b"{\"language\":\"Solidity\"}".to_vec()), None).unwrap();
        assert_eq!(out.stdout, "{\"language\":\"Solidity\"}");
    }

    #[test]
    fn test_output_within_deadline() {
        let out = run(sh("echo done"), None, Some(Duration::from_secs(10))).unwrap();
        assert_eq!(out.stdout, "done\n");
    }

    #[test]
    fn test_timeout_kills_child() {
        let err = run(sh("sleep 5"), None, Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, ToolchainError::Timeout { millis: 50, .. }));
    }

    #[test]
    fn test_timeout_covers_background_processes() {
        let start = Instant::now();
        let err = run(sh("sleep 3 & echo hi"), None, Some(Duration::from_millis(200))).unwrap_err();

        assert!(matches!(err, ToolchainError::Timeout { millis: 200, .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_missing_program() {
        let err = run(Command::new("kiln-no-such-program"), None, None).unwrap_err();
        assert!(matches!(err, ToolchainError::NotFound(name) if name == "kiln-no-such-program"));
    }
}
