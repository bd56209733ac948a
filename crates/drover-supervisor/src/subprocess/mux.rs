//! Stream multiplexer: two child pipes merged into one ordered chunk channel.
//!
//! Each pipe gets its own reader task. Both tasks feed the same bounded
//! channel as soon as a read returns, so delivery order on the channel
//! follows the order in which data became readable across the two pipes.
//! The channel closes when both readers have hit EOF and dropped their
//! senders.

use std::borrow::Cow;
use std::fmt;

use drover_core::config::SupervisorConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One read's worth of bytes from one pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptChunk {
    pub stream: StreamKind,
    pub bytes: Vec<u8>,
}

impl TranscriptChunk {
    /// Chunk bytes as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Multiplexer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxConfig {
    /// Maximum bytes per chunk.
    pub chunk_size: usize,
    /// Capacity of the shared chunk channel.
    pub channel_capacity: usize,
    /// Mirror each chunk to the supervisor's own stdout/stderr.
    pub echo: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            channel_capacity: 64,
            echo: true,
        }
    }
}

impl MuxConfig {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            channel_capacity: config.channel_capacity,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Start one reader task per stream and return the merged chunk channel.
///
/// Must be called from within a tokio runtime.
pub fn spawn_multiplexer<O, E>(
    stdout: O,
    stderr: E,
    config: MuxConfig,
) -> mpsc::Receiver<TranscriptChunk>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone(), config));
    tokio::spawn(pump(stderr, StreamKind::Stderr, tx, config));
    rx
}

/// Read `reader` until EOF, forwarding every read as one chunk.
///
/// If the receiving side goes away the pipe is still drained (and echoed)
/// so the child never blocks on a full pipe.
async fn pump<R>(
    mut reader: R,
    stream: StreamKind,
    tx: mpsc::Sender<TranscriptChunk>,
    config: MuxConfig,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; config.chunk_size.max(1)];
    let mut echo = config.echo.then(|| Echo::new(stream));
    let mut forwarding = true;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(stream = stream.as_str(), error = %e, "Pipe read failed, treating as EOF");
                break;
            }
        };
        let bytes = buf[..n].to_vec();
        trace!(stream = stream.as_str(), len = n, "Chunk read");

        if let Some(out) = echo.as_mut() {
            if let Err(e) = out.write(&bytes).await {
                warn!(stream = stream.as_str(), error = %e, "Echo failed, disabling");
                echo = None;
            }
        }

        if forwarding && tx.send(TranscriptChunk { stream, bytes }).await.is_err() {
            debug!(stream = stream.as_str(), "Chunk receiver dropped, draining pipe");
            forwarding = false;
        }
    }

    debug!(stream = stream.as_str(), "Stream reached EOF");
}

/// Live mirror of one child stream onto the matching supervisor stream.
enum Echo {
    Stdout(tokio::io::Stdout),
    Stderr(tokio::io::Stderr),
}

impl Echo {
    fn new(stream: StreamKind) -> Self {
        match stream {
            StreamKind::Stdout => Self::Stdout(tokio::io::stdout()),
            StreamKind::Stderr => Self::Stderr(tokio::io::stderr()),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Stdout(out) => {
                out.write_all(bytes).await?;
                out.flush().await
            }
            Self::Stderr(err) => {
                err.write_all(bytes).await?;
                err.flush().await
            }
        }
    }
}
