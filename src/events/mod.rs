//! Event and command dispatch owned by the host.
//!
//! Modules register handlers here from `on_enable` and the registry
//! releases them again when the module is disabled. Every registration is
//! tagged with the owning module's name.

mod bus;

use tokio::sync::mpsc;
use tracing::debug;

pub use bus::{EventBus, EventError};

/// A chat line travelling through the chat handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    /// Display prefix, such as a rank tag.
    pub prefix: Option<String>,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            prefix: None,
        }
    }

    /// The line as other players see it.
    pub fn render(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{} {}: {}", prefix, self.sender, self.text),
            None => format!("{}: {}", self.sender, self.text),
        }
    }
}

/// An anvil repair about to be priced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnvilRepair {
    pub player: String,
    pub item: String,
    pub cost: u32,
}

/// A message for a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub recipient: String,
    pub text: String,
}

/// Sending half of the host's reply channel.
///
/// Cheap to clone, so background lookups can answer after the command returns.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Reply>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, recipient: impl Into<String>, text: impl Into<String>) {
        let reply = Reply {
            recipient: recipient.into(),
            text: text.into(),
        };
        if self.tx.send(reply).is_err() {
            debug!("Reply dropped, host outbox is closed");
        }
    }
}

/// A command as seen by its handler.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub sender: String,
    pub name: String,
    pub args: Vec<String>,
    outbox: Outbox,
}

impl CommandInvocation {
    pub fn new(
        sender: impl Into<String>,
        name: impl Into<String>,
        args: Vec<String>,
        outbox: Outbox,
    ) -> Self {
        Self {
            sender: sender.into(),
            name: name.into(),
            args,
            outbox,
        }
    }

    /// Reply to the sender.
    pub fn reply(&self, text: impl Into<String>) {
        self.outbox.send(self.sender.clone(), text);
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}
