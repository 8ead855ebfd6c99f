//! Child processes with hard timeouts and bounded output capture.
//!
//! A step ends when its direct child is reaped. Pipes are then drained for at
//! most [`DRAIN_GRACE`]; a grandchild that inherited stdout/stderr (a
//! backgrounded job, a wrapper script's subprocess) cannot hold the step open.

use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long pipes are drained after the child has been reaped.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// A pipe was still open when draining stopped; output may be incomplete.
    pub detached: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_lossy(&self) -> String {
        with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn with_notice(bytes: &[u8], truncated: usize, stream: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{stream} truncated {truncated} bytes]\n"));
    }
    text
}

/// Run `cmd` with a hard timeout, capturing at most `output_limit_bytes` per stream.
///
/// Both pipes are read on background threads while the child runs, so a chatty
/// child never blocks on a full pipe. Bytes past the limit are counted and
/// discarded. On timeout the child is killed and reaped; there is no graceful
/// shutdown request.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_capture = StreamCapture::spawn(stdout, output_limit_bytes);
    let stderr_capture = StreamCapture::spawn(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let stdout = stdout_capture.finish(drain_deadline).context("capture stdout")?;
    let stderr = stderr_capture.finish(drain_deadline).context("capture stderr")?;
    let detached = !(stdout.complete && stderr.complete);
    if detached {
        warn!("output pipe held open after exit; keeping partial output");
    }
    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, detached, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        timed_out,
        detached,
    })
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
    /// The reader hit EOF or an error.
    complete: bool,
    error: Option<io::Error>,
}

/// Output of one pipe, filled by a reader thread and read back by the caller.
#[derive(Debug, Default)]
struct StreamCapture {
    state: Mutex<Captured>,
    finished: Condvar,
}

impl StreamCapture {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Arc<Self> {
        let capture = Arc::new(Self::default());
        let shared = Arc::clone(&capture);
        thread::spawn(move || shared.read_all(reader, limit));
        capture
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_all<R: Read>(&self, mut reader: R, limit: usize) {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let mut state = self.lock();
                    let keep = n.min(limit.saturating_sub(state.bytes.len()));
                    state.bytes.extend_from_slice(&chunk[..keep]);
                    state.truncated += n - keep;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.lock().error = Some(err);
                    break;
                }
            }
        }
        self.lock().complete = true;
        self.finished.notify_all();
    }

    /// Wait until the reader finishes or `deadline` passes, then take what was read.
    fn finish(&self, deadline: Instant) -> Result<Captured> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        let (mut state, _) = self
            .finished
            .wait_timeout_while(self.lock(), timeout, |state| !state.complete)
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = state.error.take() {
            return Err(err).context("read output");
        }
        Ok(std::mem::take(&mut *state))
    }
}
