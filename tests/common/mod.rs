//! Test helpers for chat tests.
//!
//! Provides TestUser (an in-memory session driver), TestClient and
//! TestServer for end-to-end tests over TCP.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use linechat::chat::stream::{EchoWriter, LineSender, OutputReceiver};
use linechat::config::ServerConfig;
use linechat::{line_stream, ChatServer, LeaveReason, Registry, Session, TelnetParser, TransportIo};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to watch for output that must not arrive.
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Everything a session has written so far, with a read cursor.
#[derive(Debug, Default)]
struct Transcript {
    text: String,
    cursor: usize,
}

impl Transcript {
    /// Take the text up to and including the next `pattern` after the cursor.
    fn take_until(&mut self, pattern: &str) -> Option<String> {
        let found = self.text[self.cursor..].find(pattern)?;
        let end = self.cursor + found + pattern.len();
        let taken = self.text[self.cursor..end].to_string();
        self.cursor = end;
        Some(taken)
    }

    fn unread(&self) -> &str {
        &self.text[self.cursor..]
    }
}

/// A session driven through its line stream, without any network.
pub struct TestUser {
    pub session: Arc<Session>,
    lines: Option<LineSender>,
    output: OutputReceiver,
    echo: EchoWriter,
    transcript: Transcript,
    handle: Option<JoinHandle<LeaveReason>>,
}

impl TestUser {
    /// Start a session that leaves when `shutdown` flips to true.
    pub fn spawn(registry: &Arc<Registry>, mut shutdown: watch::Receiver<bool>) -> Self {
        let (io, transport) = line_stream();
        let TransportIo {
            lines,
            output,
            echo,
        } = transport;
        let session = Session::new(io, Arc::clone(registry));
        let handle = tokio::spawn(Arc::clone(&session).run(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        }));

        Self {
            session,
            lines: Some(lines),
            output,
            echo,
            transcript: Transcript::default(),
            handle: Some(handle),
        }
    }

    /// Start a session and complete the join handshake as `name`.
    pub async fn join(
        registry: &Arc<Registry>,
        shutdown: watch::Receiver<bool>,
        name: &str,
    ) -> Self {
        let mut user = Self::spawn(registry, shutdown);
        user.expect("Enter your name: ").await;
        user.send_line(name);
        user.expect(&format!("other users are connected.\n\n{name}: "))
            .await;
        user
    }

    /// Submit a line of input.
    pub fn send_line(&self, line: &str) -> bool {
        self.lines
            .as_ref()
            .map(|lines| lines.send_line(line))
            .unwrap_or(false)
    }

    /// Record keystrokes that have been typed but not submitted.
    pub fn type_pending(&self, pending: &str) {
        self.echo.echo(pending.as_bytes(), pending.as_bytes());
    }

    /// Send a break signal.
    pub fn interrupt(&self) {
        if let Some(lines) = &self.lines {
            lines.interrupt();
        }
    }

    /// Report a transport failure.
    pub fn fail(&self, reason: &str) {
        if let Some(lines) = &self.lines {
            lines.fail(reason);
        }
    }

    /// End the input stream.
    pub fn close_input(&mut self) {
        self.lines = None;
    }

    fn drain(&mut self) {
        while let Some(chunk) = self.output.try_recv() {
            self.transcript
                .text
                .push_str(&String::from_utf8_lossy(chunk.as_bytes()));
        }
    }

    /// Wait until `pattern` appears after everything already expected.
    ///
    /// Returns the text up to and including the pattern.
    pub async fn expect(&mut self, pattern: &str) -> String {
        let result = timeout(DEFAULT_TIMEOUT, async {
            loop {
                self.drain();
                if let Some(taken) = self.transcript.take_until(pattern) {
                    return taken;
                }
                match self.output.recv().await {
                    Some(chunk) => self
                        .transcript
                        .text
                        .push_str(&String::from_utf8_lossy(chunk.as_bytes())),
                    None => {
                        if let Some(taken) = self.transcript.take_until(pattern) {
                            return taken;
                        }
                        panic!(
                            "output closed before {pattern:?} appeared; unread: {:?}",
                            self.transcript.unread()
                        );
                    }
                }
            }
        })
        .await;

        match result {
            Ok(taken) => taken,
            Err(_) => panic!(
                "timed out waiting for {pattern:?}; unread: {:?}",
                self.transcript.unread()
            ),
        }
    }

    /// Collect output for a quiet period and return everything not yet expected.
    pub async fn unread_after_quiet(&mut self) -> String {
        tokio::time::sleep(QUIET_PERIOD).await;
        self.drain();
        self.transcript.unread().to_string()
    }

    /// Full output so far.
    pub fn transcript(&mut self) -> String {
        self.drain();
        self.transcript.text.clone()
    }

    /// Wait for the session to leave and return why it left.
    pub async fn finished(&mut self) -> LeaveReason {
        let handle = self.handle.take().expect("session already awaited");
        timeout(DEFAULT_TIMEOUT, handle)
            .await
            .expect("session did not finish in time")
            .expect("session task panicked")
    }
}

/// Test client for connecting to the chat server.
pub struct TestClient {
    stream: TcpStream,
    parser: TelnetParser,
    text: Vec<u8>,
    cursor: usize,
}

impl TestClient {
    /// Connect to the server at the given address.
    pub async fn connect(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            parser: TelnetParser::new(),
            text: Vec::with_capacity(4096),
            cursor: 0,
        })
    }

    /// Send raw bytes to the server.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Send a line (with CR LF) to the server.
    pub async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        self.send_raw(line.as_bytes()).await?;
        self.send_raw(b"\r\n").await
    }

    /// Receive data until a pattern is found.
    pub async fn recv_until(&mut self, pattern: &str) -> Result<String, std::io::Error> {
        self.recv_until_timeout(pattern, DEFAULT_TIMEOUT).await
    }

    /// Receive data until a pattern is found with custom timeout.
    ///
    /// Telnet commands are stripped; only data bytes are matched.
    pub async fn recv_until_timeout(
        &mut self,
        pattern: &str,
        duration: Duration,
    ) -> Result<String, std::io::Error> {
        let mut buf = [0u8; 1024];

        let result = timeout(duration, async {
            loop {
                let unread = String::from_utf8_lossy(&self.text[self.cursor..]).into_owned();
                if let Some(found) = unread.find(pattern) {
                    let end = found + pattern.len();
                    self.cursor += unread[..end].len();
                    return Ok(unread[..end].to_string());
                }
                match self.stream.read(&mut buf).await {
                    Ok(0) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("connection closed before {pattern:?}; unread: {unread:?}"),
                        ))
                    }
                    Ok(n) => {
                        let (data, _commands) = self.parser.parse(&buf[..n]);
                        self.text.extend_from_slice(&data);
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match result {
            Ok(r) => r,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("Timeout waiting for pattern: {}", pattern),
            )),
        }
    }

    /// Read until the server closes the connection and return the unread text.
    pub async fn recv_to_end(&mut self) -> Result<String, std::io::Error> {
        let mut rest = Vec::new();
        timeout(DEFAULT_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no EOF"))??;
        let (data, _commands) = self.parser.parse(&rest);
        self.text.extend_from_slice(&data);
        let unread = String::from_utf8_lossy(&self.text[self.cursor..]).into_owned();
        self.cursor = self.text.len();
        Ok(unread)
    }

    /// Answer the server's echo offer so it echoes keystrokes.
    pub async fn accept_server_echo(&mut self) -> Result<(), std::io::Error> {
        use linechat::server::{iac, option};
        self.send_raw(&[iac::IAC, iac::DO, option::ECHO, iac::IAC, iac::DO, option::SGA])
            .await
    }

    /// Complete the join handshake as `name`.
    pub async fn join(&mut self, name: &str) -> Result<String, std::io::Error> {
        self.recv_until("Enter your name: ").await?;
        self.send_line(name).await?;
        self.recv_until(&format!("other users are connected.\r\n\r\n{name}: "))
            .await
    }
}

/// Test server lifecycle management.
pub struct TestServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<linechat::Result<()>>>,
}

impl TestServer {
    /// Start a server on a random local port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_max_connections(10).await
    }

    /// Start a server with a custom connection limit.
    pub async fn with_max_connections(
        max_connections: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections,
            max_line_length: 256,
        };
        let server = ChatServer::bind(&config).await?;
        let addr = server.local_addr()?;
        let registry = server.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            addr,
            registry,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the shared participant registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Connect a new client.
    pub async fn connect(&self) -> Result<TestClient, std::io::Error> {
        TestClient::connect(self.addr).await
    }

    /// Stop the server and wait for it to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            timeout(DEFAULT_TIMEOUT * 3, handle)
                .await
                .expect("server did not stop in time")
                .expect("server task panicked")
                .expect("server returned an error");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A shutdown signal that never fires until the returned sender is used.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Wait until `registry` holds `count` sessions.
pub async fn wait_for_count(registry: &Registry, count: usize) {
    timeout(DEFAULT_TIMEOUT, async {
        while registry.len().await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached the expected size");
}
