//! Broadcast delivery with prompt restore.

use std::sync::Arc;

use tracing::debug;

use super::registry::Registry;
use super::session::Session;

/// A line of text to deliver to the current participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Text to deliver, including its trailing newline.
    pub text: String,
    /// Whether the originating session is skipped.
    pub exclude_sender: bool,
}

impl Message {
    /// Create a message for everyone except the sender.
    pub fn to_others(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exclude_sender: true,
        }
    }

    /// Create a message for everyone, the sender included.
    pub fn to_all(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exclude_sender: false,
        }
    }

    /// A chat line typed by `name`.
    pub fn chat(name: &str, line: &str) -> Self {
        Self::to_others(format!("{name}: {line}\n"))
    }

    /// Arrival notice for `name`.
    pub fn arrival(name: &str) -> Self {
        Self::to_others(format!("*** {name} has entered chat ***\n"))
    }

    /// Departure notice for `name`.
    pub fn departure(name: &str) -> Self {
        Self::to_others(format!("*** {name} has left chat ***\n"))
    }
}

/// Fans messages out to the sessions in a registry.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Deliver `message` to every current target in join order.
    ///
    /// Each target receives the text through its prompt-restoring redraw.
    /// The registry stays locked for the whole fan-out. Returns the number of
    /// targets that accepted the message.
    pub async fn broadcast(&self, origin: &Session, message: &Message) -> usize {
        let excluding = message.exclude_sender.then(|| origin.id());
        let targets = self.registry.snapshot_targets(excluding).await;

        let mut delivered = 0;
        for target in targets.iter() {
            if target.deliver_with_prompt_restore(&message.text) {
                delivered += 1;
            } else {
                debug!(
                    "Dropped broadcast from {} to closed session {}",
                    origin.id(),
                    target.id()
                );
            }
        }
        delivered
    }
}
