//! Run child processes with a timeout and bounded output capture.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// How long readers may keep draining once the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

type StreamResult = std::io::Result<(Vec<u8>, usize)>;

/// Run `cmd` to completion or until `timeout` elapses, whichever comes first.
///
/// stdin is closed. stdout/stderr are drained on reader threads while the child
/// runs so a chatty child can never fill a pipe and stall. At most
/// `output_limit_bytes` of each stream is kept; the rest is counted and dropped.
/// A timed-out child is killed and reported with `timed_out = true`.
///
/// A grandchild that inherited the pipes (an ssh transport, a remote helper)
/// can hold them open after the child exits. Readers are given until the
/// overall deadline, or [`READER_GRACE`] after a kill, and are then abandoned;
/// the call is reported as timed out.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> std::io::Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e);
        }
    };

    let stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| pipe_missing("stderr"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill()?;
            child.wait()?
        }
    };

    let now = Instant::now();
    let deadline = if timed_out {
        now + READER_GRACE
    } else {
        (started + timeout).max(now + READER_GRACE)
    };

    let stdout = collect_output(&stdout_rx, deadline, "stdout")?;
    let stderr = collect_output(&stderr_rx, deadline, "stderr")?;
    if stdout.is_none() || stderr.is_none() {
        timed_out = true;
    }
    let (stdout, stdout_truncated) = stdout.unwrap_or_default();
    let (stderr, stderr_truncated) = stderr.unwrap_or_default();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn pipe_missing(stream: &str) -> std::io::Error {
    std::io::Error::other(format!("{stream} was not piped"))
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone when the reader was abandoned.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Wait for a reader until `deadline`. `None` means the reader was abandoned.
fn collect_output(
    rx: &Receiver<StreamResult>,
    deadline: Instant,
    stream: &'static str,
) -> std::io::Result<Option<(Vec<u8>, usize)>> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result.map(Some),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe still held open after child exit, abandoning reader");
            Ok(None)
        }
        Err(RecvTimeoutError::Disconnected) => Err(std::io::Error::other(format!(
            "{stream} reader thread panicked"
        ))),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// Render a command line for logs and error messages.
pub fn display_command(program: &str, args: &[&str]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            out.push_str(&format!("'{arg}'"));
        } else {
            out.push_str(arg);
        }
    }
    out
}
