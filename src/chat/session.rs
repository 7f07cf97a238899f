//! Chat session: one connected user's conversation and lifecycle.
//!
//! A session moves through `Connecting → Active → Leaving → Closed`. Every
//! way out of a conversation (the `/exit` command, end of input, a break
//! signal, a transport failure or server shutdown) converges on
//! [`Session::leave`], which runs the teardown exactly once.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use super::broadcast::{Broadcaster, Message};
use super::command::{self, parse_input, ChatInput, CommandOutcome};
use super::registry::Registry;
use super::stream::{LineInput, OutputSink, SessionIo};
use crate::{ChatError, Result};

/// Greeting written when a session starts.
pub const WELCOME_BANNER: &str = "Welcome to chat!\n\n";

/// Prompt asking for the display name.
pub const NAME_PROMPT: &str = "Enter your name: ";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Waiting for the user to enter a name.
    #[default]
    Connecting,
    /// Registered and participating.
    Active,
    /// Teardown in progress.
    Leaving,
    /// Finished.
    Closed,
}

/// Why a session left the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The user issued the exit command.
    Exit,
    /// The input stream ended.
    EndOfInput,
    /// The transport delivered a break/interrupt signal.
    Interrupted,
    /// The transport failed.
    Disconnected,
    /// The server is shutting down.
    Shutdown,
}

impl LeaveReason {
    fn from_error(error: &ChatError) -> Self {
        match error {
            ChatError::Interrupted => LeaveReason::Interrupted,
            _ => LeaveReason::Disconnected,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Exit => "exit",
            LeaveReason::EndOfInput => "end of input",
            LeaveReason::Interrupted => "interrupted",
            LeaveReason::Disconnected => "disconnected",
            LeaveReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connected chat participant.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier.
    id: Uuid,
    /// Display name, set once by [`Session::join`].
    name: OnceLock<String>,
    /// Current lifecycle state.
    state: Mutex<LifecycleState>,
    /// Line source, read only by the session's own task.
    input: tokio::sync::Mutex<LineInput>,
    /// Text sink, shared with other sessions' broadcasts.
    output: OutputSink,
    /// Shared participant registry.
    registry: Arc<Registry>,
}

impl Session {
    /// Create a new session in the `Connecting` state.
    pub fn new(io: SessionIo, registry: Arc<Registry>) -> Arc<Self> {
        let id = Uuid::new_v4();
        debug!("Created new session {}", id);

        Arc::new(Self {
            id,
            name: OnceLock::new(),
            state: Mutex::new(LifecycleState::Connecting),
            input: tokio::sync::Mutex::new(io.input),
            output: io.output,
            registry,
        })
    }

    /// Get the session ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the display name, if the join handshake has completed.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move from `from` to `to`. Returns false if the session was not in `from`.
    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let mut state = self.lock_state();
        if *state != from {
            return false;
        }
        debug!("Session {} state changed: {:?} -> {:?}", self.id, from, to);
        *state = to;
        true
    }

    /// Record the display name.
    ///
    /// Fails only if a name was already recorded.
    pub fn join(&self, name: impl Into<String>) -> Result<()> {
        self.name.set(name.into()).map_err(ChatError::AlreadyJoined)
    }

    /// The prompt shown in front of the user's input.
    pub fn prompt(&self) -> String {
        format!("{}: ", self.name().unwrap_or_default())
    }

    /// Wait for the next line of input, stripped of its line terminator.
    ///
    /// Returns `Ok(None)` when the stream has ended.
    pub async fn read_line(&self) -> Result<Option<String>> {
        let line = self.input.lock().await.read_line().await?;
        Ok(line.map(|line| line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Stop reading input; the read loop sees end of stream next.
    pub async fn close_input(&self) {
        self.input.lock().await.close();
    }

    /// Write text verbatim to this session's output.
    pub fn send(&self, text: &str) {
        if !self.output.write(text) {
            debug!("Session {} output closed, dropped {} bytes", self.id, text.len());
        }
    }

    /// Write this session's prompt.
    pub fn write_prompt(&self) {
        self.send(&self.prompt());
    }

    /// Deliver a broadcast line, then restore the prompt and any unsent input.
    ///
    /// Returns false if the output is closed.
    pub fn deliver_with_prompt_restore(&self, text: &str) -> bool {
        self.output.redraw(text, &self.prompt())
    }

    fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(Arc::clone(&self.registry))
    }

    /// Run the session until it leaves the chat.
    ///
    /// `shutdown` is the runtime's interruption signal; when it completes the
    /// session leaves as if its input had ended.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> LeaveReason
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        self.send(WELCOME_BANNER);
        self.send(NAME_PROMPT);

        let name = tokio::select! {
            line = self.read_line() => match line {
                Ok(Some(name)) => name,
                Ok(None) => return self.finish(LeaveReason::EndOfInput).await,
                Err(e) => return self.finish(LeaveReason::from_error(&e)).await,
            },
            _ = &mut shutdown => return self.finish(LeaveReason::Shutdown).await,
        };

        if let Err(e) = self.join(name) {
            debug!("Session {} join failed: {}", self.id, e);
            return self.finish(LeaveReason::Disconnected).await;
        }
        self.activate().await;

        let mut exit_requested = false;
        let reason = loop {
            tokio::select! {
                line = self.read_line() => match line {
                    Ok(Some(line)) => {
                        if self.handle_line(&line).await == CommandOutcome::Exit {
                            exit_requested = true;
                        }
                    }
                    Ok(None) if exit_requested => break LeaveReason::Exit,
                    Ok(None) => break LeaveReason::EndOfInput,
                    Err(e) => break LeaveReason::from_error(&e),
                },
                _ = &mut shutdown => break LeaveReason::Shutdown,
            }
        };

        self.finish(reason).await
    }

    async fn finish(&self, reason: LeaveReason) -> LeaveReason {
        self.leave(reason).await;
        reason
    }

    /// Complete the join handshake: register, announce, and show the prompt.
    async fn activate(self: &Arc<Self>) {
        if !self.transition(LifecycleState::Connecting, LifecycleState::Active) {
            return;
        }
        // The count goes out before any broadcast can reach this session.
        self.registry
            .insert_with(self, |others| {
                self.send(&format!("\n{others} other users are connected.\n\n"));
            })
            .await;
        let name = self.name().unwrap_or_default();
        info!("{} joined chat (session {})", name, self.id);

        self.broadcaster()
            .broadcast(self, &Message::arrival(name))
            .await;
        self.write_prompt();
    }

    /// Handle one submitted line: a command or chat text.
    async fn handle_line(&self, line: &str) -> CommandOutcome {
        match parse_input(line) {
            ChatInput::Command(command) => command::execute(&command, self, &self.registry).await,
            ChatInput::Message(text) => {
                let name = self.name().unwrap_or_default();
                self.broadcaster()
                    .broadcast(self, &Message::chat(name, &text))
                    .await;
                self.write_prompt();
                CommandOutcome::Continue
            }
        }
    }

    /// Leave the chat.
    ///
    /// The first call moves the session to `Leaving`, removes it from the
    /// registry, announces the departure to the remaining participants and
    /// closes the output. Later calls return false and do nothing. A session
    /// that never finished joining is closed without a departure notice.
    pub async fn leave(&self, reason: LeaveReason) -> bool {
        let was_active = {
            let mut state = self.lock_state();
            match *state {
                LifecycleState::Connecting | LifecycleState::Active => {
                    let was_active = *state == LifecycleState::Active;
                    debug!("Session {} state changed: {:?} -> Leaving", self.id, *state);
                    *state = LifecycleState::Leaving;
                    was_active
                }
                LifecycleState::Leaving | LifecycleState::Closed => return false,
            }
        };

        if was_active {
            self.registry.remove(self).await;
            let name = self.name().unwrap_or_default();
            self.broadcaster()
                .broadcast(self, &Message::departure(name))
                .await;
            info!("{} left chat (session {}, {})", name, self.id, reason);
        } else {
            debug!("Session {} closed before joining ({})", self.id, reason);
        }

        self.output.close();
        self.transition(LifecycleState::Leaving, LifecycleState::Closed);
        true
    }
}
