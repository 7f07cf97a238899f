//! Line stream plumbing between a transport and a chat session.
//!
//! [`line_stream`] creates a connected pair of endpoints. The session side
//! ([`SessionIo`]) reads complete lines and writes text; the transport side
//! ([`TransportIo`]) feeds lines in and drains output chunks out.
//!
//! Output is buffered in an unbounded queue per session, so a slow reader
//! never stalls writers. The queue sender and the user's not-yet-submitted
//! input live behind one lock (the per-session terminal lock), which makes a
//! prompt-restoring redraw atomic with respect to other writes and to echo of
//! the user's own keystrokes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::{ChatError, Result};

/// Erase the whole display line and return the cursor to column zero.
pub const ERASE_LINE: &str = "\x1b[2K\r";

/// An event delivered from the transport to the session's input side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A complete line, without its terminator.
    Line(String),
    /// The remote side sent a break/interrupt signal.
    Break,
    /// The transport failed and no more input will arrive.
    Failed(String),
}

/// A chunk of output queued for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text whose `\n` line endings the transport may translate.
    Text(Vec<u8>),
    /// Protocol bytes that must be written untouched.
    Raw(Vec<u8>),
}

impl Outbound {
    /// Get the chunk's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Outbound::Text(bytes) | Outbound::Raw(bytes) => bytes,
        }
    }
}

#[derive(Debug)]
struct Terminal {
    /// Output queue, `None` once the sink has been closed.
    tx: Option<mpsc::UnboundedSender<Outbound>>,
    /// Input the user has typed but not yet submitted.
    pending: Vec<u8>,
}

impl Terminal {
    fn push(&mut self, chunk: Outbound) -> bool {
        match &self.tx {
            Some(tx) => tx.send(chunk).is_ok(),
            None => false,
        }
    }
}

fn lock(terminal: &Mutex<Terminal>) -> MutexGuard<'_, Terminal> {
    terminal.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected session/transport pair.
pub fn line_stream() -> (SessionIo, TransportIo) {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let terminal = Arc::new(Mutex::new(Terminal {
        tx: Some(out_tx),
        pending: Vec::new(),
    }));

    let session = SessionIo {
        input: LineInput {
            rx: line_rx,
            closed: false,
        },
        output: OutputSink {
            terminal: Arc::clone(&terminal),
        },
    };
    let transport = TransportIo {
        lines: LineSender { tx: line_tx },
        output: OutputReceiver { rx: out_rx },
        echo: EchoWriter { terminal },
    };
    (session, transport)
}

/// Session-side endpoints.
#[derive(Debug)]
pub struct SessionIo {
    /// Line source.
    pub input: LineInput,
    /// Text sink.
    pub output: OutputSink,
}

/// Transport-side endpoints.
#[derive(Debug)]
pub struct TransportIo {
    /// Feeds lines and signals into the session. Dropping it ends the stream.
    pub lines: LineSender,
    /// Drains the session's output.
    pub output: OutputReceiver,
    /// Reports the user's unsent input and echoes keystrokes.
    pub echo: EchoWriter,
}

/// Readable line source owned by a session.
#[derive(Debug)]
pub struct LineInput {
    rx: mpsc::UnboundedReceiver<InputEvent>,
    closed: bool,
}

impl LineInput {
    /// Wait for the next line.
    ///
    /// Returns `Ok(None)` at end of stream or after [`LineInput::close`].
    /// Break signals and transport failures are returned as errors.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(InputEvent::Line(line)) => Ok(Some(line)),
            Some(InputEvent::Break) => Err(ChatError::Interrupted),
            Some(InputEvent::Failed(reason)) => Err(ChatError::Transport(reason)),
            None => Ok(None),
        }
    }

    /// Signal that no more input will be read.
    ///
    /// Lines already queued are discarded.
    pub fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }

    /// Check whether the input side has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Writable text sink owned by a session.
#[derive(Debug)]
pub struct OutputSink {
    terminal: Arc<Mutex<Terminal>>,
}

impl OutputSink {
    /// Queue text verbatim.
    ///
    /// Returns false if the sink is closed or the transport has gone away.
    pub fn write(&self, text: &str) -> bool {
        lock(&self.terminal).push(Outbound::Text(text.as_bytes().to_vec()))
    }

    /// Interrupt the current line with `message`, then restore `prompt` and
    /// whatever the user had typed but not yet submitted.
    ///
    /// The four steps are queued as one chunk under the terminal lock.
    pub fn redraw(&self, message: &str, prompt: &str) -> bool {
        let mut terminal = lock(&self.terminal);
        let len = ERASE_LINE.len() + message.len() + prompt.len() + terminal.pending.len();
        let mut chunk = Vec::with_capacity(len);
        chunk.extend_from_slice(ERASE_LINE.as_bytes());
        chunk.extend_from_slice(message.as_bytes());
        chunk.extend_from_slice(prompt.as_bytes());
        chunk.extend_from_slice(&terminal.pending);
        terminal.push(Outbound::Text(chunk))
    }

    /// Close the sink. Queued output is still delivered; later writes are dropped.
    pub fn close(&self) {
        lock(&self.terminal).tx = None;
    }

    /// Check whether the sink has been closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.terminal).tx.is_none()
    }
}

/// Transport handle for feeding input into a session.
#[derive(Debug)]
pub struct LineSender {
    tx: mpsc::UnboundedSender<InputEvent>,
}

impl LineSender {
    /// Deliver a complete line. Returns false once the session stopped reading.
    pub fn send_line(&self, line: impl Into<String>) -> bool {
        self.tx.send(InputEvent::Line(line.into())).is_ok()
    }

    /// Deliver a break/interrupt signal.
    pub fn interrupt(&self) -> bool {
        self.tx.send(InputEvent::Break).is_ok()
    }

    /// Report a transport failure.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(InputEvent::Failed(reason.into())).is_ok()
    }

    /// Check whether the session has closed its input side.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport handle for draining a session's output.
#[derive(Debug)]
pub struct OutputReceiver {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl OutputReceiver {
    /// Wait for the next chunk. Returns `None` once the sink is closed and drained.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Take the next chunk if one is already queued.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }
}

/// Transport handle for local echo and unsent-input tracking.
#[derive(Debug, Clone)]
pub struct EchoWriter {
    terminal: Arc<Mutex<Terminal>>,
}

impl EchoWriter {
    /// Record the user's current unsent input and queue the echo bytes for
    /// the keystroke that produced it.
    pub fn echo(&self, echo: &[u8], pending: &[u8]) -> bool {
        let mut terminal = lock(&self.terminal);
        terminal.pending.clear();
        terminal.pending.extend_from_slice(pending);
        if echo.is_empty() {
            return terminal.tx.is_some();
        }
        terminal.push(Outbound::Text(echo.to_vec()))
    }

    /// Queue protocol bytes that bypass newline translation.
    pub fn raw(&self, bytes: Vec<u8>) -> bool {
        lock(&self.terminal).push(Outbound::Raw(bytes))
    }

    /// Get a copy of the user's current unsent input.
    #[cfg(test)]
    pub fn pending(&self) -> Vec<u8> {
        lock(&self.terminal).pending.clone()
    }
}
