//! One Telnet connection bridged to a chat session.
//!
//! Two tasks pump bytes: the reader turns keystrokes into lines (echoing
//! them while the client lets the server echo), the writer drains the
//! session's output queue onto the socket. The session itself runs on the
//! connection's task and owns the conversation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::input::{control, InputResult, LineBuffer};
use super::telnet::{iac, initial_negotiation, NegotiationState, TelnetParser};
use crate::chat::stream::{EchoWriter, LineSender, OutputReceiver};
use crate::chat::{line_stream, LeaveReason, Outbound, Registry, Session, TransportIo};

/// How long queued output may take to reach a departing client.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve one connection until its session leaves the chat.
///
/// `shutdown` flips to `true` when the server stops; the session then
/// leaves with [`LeaveReason::Shutdown`].
pub async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    registry: Arc<Registry>,
    shutdown: watch::Receiver<bool>,
    max_line_length: usize,
) -> LeaveReason
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (io, transport) = line_stream();
    let TransportIo {
        lines,
        output,
        echo,
    } = transport;
    let session = Session::new(io, registry);
    debug!("Session {} serves {}", session.id(), peer);

    let (reader, writer) = tokio::io::split(stream);
    echo.raw(initial_negotiation());
    let writer_task = tokio::spawn(write_output(writer, output));
    let reader_task = tokio::spawn(read_input(reader, lines, echo, max_line_length, peer));

    let reason = session.run(wait_for_shutdown(shutdown)).await;

    reader_task.abort();
    match tokio::time::timeout(FLUSH_TIMEOUT, writer_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => debug!("Write to {} failed: {}", peer, e),
        Ok(Err(e)) => warn!("Writer task for {} failed: {}", peer, e),
        Err(_) => warn!("Timed out flushing output to {}", peer),
    }

    info!("Connection from {} closed ({})", peer, reason);
    reason
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender also counts as shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Read keystrokes, answer negotiation, and feed complete lines to the session.
async fn read_input<R>(
    mut reader: R,
    lines: LineSender,
    echo: EchoWriter,
    max_line_length: usize,
    peer: SocketAddr,
) where
    R: AsyncRead + Unpin,
{
    let mut parser = TelnetParser::new();
    let mut negotiation = NegotiationState::default();
    let mut line_buffer = LineBuffer::new(max_line_length);
    let mut buf = [0u8; 512];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("{} closed the connection", peer);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                lines.fail(e.to_string());
                return;
            }
        };

        let (data, commands) = parser.parse(&buf[..n]);
        for command in &commands {
            if command.is_interrupt() {
                debug!("{} sent {:?}", peer, command);
                lines.interrupt();
                return;
            }
            let reply = TelnetParser::respond_to_command(command, &mut negotiation);
            if !reply.is_empty() {
                echo.raw(reply);
            }
        }

        for byte in data {
            let (result, echoed) = line_buffer.process_byte(byte);
            if negotiation.echo_enabled {
                echo.echo(&echoed, line_buffer.contents());
            }
            match result {
                InputResult::Line(line) => {
                    if !lines.send_line(line) {
                        return;
                    }
                }
                InputResult::Eof => return,
                InputResult::Cancel | InputResult::Buffering => {}
            }
        }
    }
}

/// Drain the session's output onto the socket.
async fn write_output<W>(mut writer: W, mut output: OutputReceiver) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = output.recv().await {
        let bytes = match chunk {
            Outbound::Text(text) => encode_text(&text),
            Outbound::Raw(raw) => raw,
        };
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Prepare text for the wire: bare LF becomes CR LF and data 0xFF is doubled.
pub fn encode_text(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + text.len() / 8);
    let mut prev = None;
    for &byte in text {
        match byte {
            control::LF if prev != Some(control::CR) => {
                out.extend_from_slice(&[control::CR, control::LF])
            }
            iac::IAC => out.extend_from_slice(&[iac::IAC, iac::IAC]),
            _ => out.push(byte),
        }
        prev = Some(byte);
    }
    out
}
