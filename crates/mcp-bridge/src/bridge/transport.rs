//! Line transport over a child process's stdio pipes.
//!
//! - **LineTransport**: write a line, read a line, poll liveness, terminate
//! - **Spawner**: launches a child and hands back its transport
//!
//! Both are traits so the session layer can be driven by fakes in tests.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::LineCodec;

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Log target for lines the child writes to stderr.
pub const CHILD_LOG_TARGET: &str = "mcp_bridge::child";

/// Longest stderr line forwarded to the log.
const STDERR_MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("executable not found: {program}")]
    NotFound {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} not captured")]
    Pipe(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("write to MCP server failed: {0}")]
    Write(#[source] io::Error),
    #[error("read from MCP server failed: {0}")]
    Read(#[source] io::Error),
    #[error("MCP server closed its output stream")]
    EndOfStream,
    #[error("refusing to write a line containing a newline")]
    EmbeddedNewline,
}

/// Line-oriented connection to one child process.
#[async_trait]
pub trait LineTransport: Send {
    /// Non-blocking check that the child has not exited.
    fn is_alive(&mut self) -> bool;

    /// Write `line` plus a `\n` terminator and flush.
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Wait for the next complete line. `None` means end-of-stream.
    async fn read_line(&mut self) -> Result<Option<String>, TransportError>;

    /// Stop the child and reap it. Best-effort, never fails.
    async fn terminate(&mut self);

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Launches a child process and connects a transport to it.
pub trait Spawner: Send + Sync {
    fn start(&self) -> Result<Box<dyn LineTransport>, SpawnError>;

    /// Human-readable command line, for logs.
    fn describe(&self) -> String;
}

/// Transport over a tokio child process.
pub struct ChildTransport {
    child: Child,
    writer: FramedWrite<ChildStdin, LineCodec>,
    reader: FramedRead<ChildStdout, LineCodec>,
}

impl ChildTransport {
    pub fn new(child: Child, stdin: ChildStdin, stdout: ChildStdout, codec: LineCodec) -> Self {
        Self {
            child,
            writer: FramedWrite::new(stdin, LineCodec::new()),
            reader: FramedRead::new(stdout, codec),
        }
    }
}

#[async_trait]
impl LineTransport for ChildTransport {
    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::debug!(%status, "MCP server process has exited");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll MCP server process");
                false
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if line.contains('\n') {
            return Err(TransportError::EmbeddedNewline);
        }
        // send() flushes the sink, so the child sees the bytes immediately.
        self.writer
            .send(line.to_string())
            .await
            .map_err(TransportError::Write)
    }

    async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        match self.reader.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(TransportError::Read(e)),
            None => Ok(None),
        }
    }

    async fn terminate(&mut self) {
        let pid = self.child.id();
        if !self.is_alive() {
            // Already exited: reap so it does not linger as a zombie.
            let _ = self.child.wait().await;
            return;
        }

        if graceful_stop(&mut self.child).await {
            return;
        }

        if let Err(e) = self.child.kill().await {
            tracing::warn!(?pid, error = %e, "Failed to kill MCP server process");
        }
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// SIGTERM the child and wait up to [`TERMINATE_GRACE`] for it to exit.
#[cfg(unix)]
async fn graceful_stop(child: &mut Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "SIGTERM failed, killing");
        return false;
    }
    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(pid, %status, "MCP server exited after SIGTERM");
            true
        }
        _ => {
            tracing::warn!(pid, "MCP server ignored SIGTERM, killing");
            false
        }
    }
}

#[cfg(not(unix))]
async fn graceful_stop(_child: &mut Child) -> bool {
    false
}

/// Spawns a fixed command with all three stdio streams piped.
///
/// The child inherits this process's environment. Its stderr is forwarded to
/// tracing so the pipe never fills up and stalls the child.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: String,
    args: Vec<String>,
    max_line_bytes: Option<usize>,
}

impl CommandSpawner {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            max_line_bytes: None,
        }
    }

    /// `<python> -m <module>`
    pub fn python_module(python: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(python, ["-m".to_string(), module.into()])
    }

    pub fn with_max_line_bytes(mut self, max: Option<usize>) -> Self {
        self.max_line_bytes = max;
        self
    }

    fn codec(&self) -> LineCodec {
        match self.max_line_bytes {
            Some(max) => LineCodec::with_max_length(max),
            None => LineCodec::new(),
        }
    }
}

impl Spawner for CommandSpawner {
    fn start(&self) -> Result<Box<dyn LineTransport>, SpawnError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                let program = self.program.clone();
                if source.kind() == io::ErrorKind::NotFound {
                    SpawnError::NotFound { program, source }
                } else {
                    SpawnError::Spawn { program, source }
                }
            })?;

        let stdin = child.stdin.take().ok_or(SpawnError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(SpawnError::Pipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr, child.id());
        }

        tracing::debug!(pid = ?child.id(), command = %self.describe(), "Spawned MCP server");
        Ok(Box::new(ChildTransport::new(
            child,
            stdin,
            stdout,
            self.codec(),
        )))
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn stderr_codec() -> LineCodec {
    LineCodec::with_max_length(STDERR_MAX_LINE_BYTES)
}

fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = FramedRead::new(stderr, stderr_codec());
    tokio::spawn(async move {
        while let Some(next) = lines.next().await {
            match next {
                Ok(line) => tracing::info!(target: CHILD_LOG_TARGET, ?pid, "{}", line),
                Err(e) => {
                    // The framed reader is finished after an error; keep the pipe
                    // drained so the child never blocks on a full stderr.
                    tracing::warn!(
                        target: CHILD_LOG_TARGET,
                        ?pid,
                        error = %e,
                        max_line_bytes = lines.decoder().max_length(),
                        "Discarding remaining MCP server stderr"
                    );
                    let mut stderr = lines.into_inner();
                    let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
                    return;
                }
            }
        }
        tracing::trace!(target: CHILD_LOG_TARGET, ?pid, "stderr closed");
    });
}
