//! Handler registry and dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{AnvilRepair, ChatMessage, CommandInvocation, Outbox, Reply};
use crate::utils::CommandLine;

type ChatHandler = Arc<dyn Fn(&mut ChatMessage) -> anyhow::Result<()> + Send + Sync>;
type AnvilHandler = Arc<dyn Fn(&mut AnvilRepair) -> anyhow::Result<()> + Send + Sync>;
type CommandHandler = Arc<dyn Fn(&CommandInvocation) -> anyhow::Result<()> + Send + Sync>;

/// Dispatch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("command '/{command}' is already registered by '{owner}'")]
    CommandTaken { command: String, owner: String },

    #[error("unknown command '/{0}'")]
    UnknownCommand(String),
}

struct Registration<H> {
    owner: String,
    handler: H,
}

#[derive(Default)]
struct Handlers {
    chat: Vec<Registration<ChatHandler>>,
    anvil: Vec<Registration<AnvilHandler>>,
    commands: HashMap<String, Registration<CommandHandler>>,
}

/// Host-owned dispatcher for chat lines, anvil events and commands.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Handlers>>,
    outbox: Outbox,
}

impl EventBus {
    /// Create a bus and the receiving end of its reply channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (outbox, replies) = Outbox::channel();
        let bus = Self {
            handlers: Arc::new(RwLock::new(Handlers::default())),
            outbox,
        };
        (bus, replies)
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    pub fn on_chat<F>(&self, owner: &str, handler: F)
    where
        F: Fn(&mut ChatMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().chat.push(Registration {
            owner: owner.to_string(),
            handler: Arc::new(handler),
        });
        debug!("{} registered a chat handler", owner);
    }

    pub fn on_anvil<F>(&self, owner: &str, handler: F)
    where
        F: Fn(&mut AnvilRepair) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().anvil.push(Registration {
            owner: owner.to_string(),
            handler: Arc::new(handler),
        });
        debug!("{} registered an anvil handler", owner);
    }

    /// Register a command. Names are case-insensitive and owned by one module.
    pub fn on_command<F>(&self, owner: &str, name: &str, handler: F) -> Result<(), EventError>
    where
        F: Fn(&CommandInvocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.to_lowercase();
        let mut handlers = self.handlers.write();

        if let Some(existing) = handlers.commands.get(&name) {
            return Err(EventError::CommandTaken {
                command: name,
                owner: existing.owner.clone(),
            });
        }

        debug!("{} registered command /{}", owner, name);
        handlers.commands.insert(
            name,
            Registration {
                owner: owner.to_string(),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Drop every registration owned by `owner`. Returns how many were removed.
    pub fn release(&self, owner: &str) -> usize {
        let mut handlers = self.handlers.write();
        let before = handlers.chat.len() + handlers.anvil.len() + handlers.commands.len();

        handlers.chat.retain(|r| r.owner != owner);
        handlers.anvil.retain(|r| r.owner != owner);
        handlers.commands.retain(|_, r| r.owner != owner);

        let after = handlers.chat.len() + handlers.anvil.len() + handlers.commands.len();
        before - after
    }

    /// Number of registrations currently owned by `owner`.
    pub fn registrations(&self, owner: &str) -> usize {
        let handlers = self.handlers.read();
        handlers.chat.iter().filter(|r| r.owner == owner).count()
            + handlers.anvil.iter().filter(|r| r.owner == owner).count()
            + handlers.commands.values().filter(|r| r.owner == owner).count()
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every chat handler in registration order.
    ///
    /// Each handler runs independently; one handler's error doesn't stop the others.
    pub fn dispatch_chat(&self, msg: &mut ChatMessage) {
        let handlers: Vec<(String, ChatHandler)> = self
            .handlers
            .read()
            .chat
            .iter()
            .map(|r| (r.owner.clone(), Arc::clone(&r.handler)))
            .collect();

        for (owner, handler) in handlers {
            if let Err(e) = handler(msg) {
                error!("Chat handler of {} failed: {:#}", owner, e);
            }
        }
    }

    /// Run every anvil handler in registration order.
    pub fn dispatch_anvil(&self, repair: &mut AnvilRepair) {
        let handlers: Vec<(String, AnvilHandler)> = self
            .handlers
            .read()
            .anvil
            .iter()
            .map(|r| (r.owner.clone(), Arc::clone(&r.handler)))
            .collect();

        for (owner, handler) in handlers {
            if let Err(e) = handler(repair) {
                error!("Anvil handler of {} failed: {:#}", owner, e);
            }
        }
    }

    /// Route a command to its handler.
    ///
    /// Handler failures are logged and reported to the sender; only an
    /// unknown command is returned as an error.
    pub fn dispatch_command(&self, sender: &str, command: &CommandLine) -> Result<(), EventError> {
        let (owner, handler) = {
            let handlers = self.handlers.read();
            let registration = handlers
                .commands
                .get(&command.name)
                .ok_or_else(|| EventError::UnknownCommand(command.name.clone()))?;
            (registration.owner.clone(), Arc::clone(&registration.handler))
        };

        let invocation =
            CommandInvocation::new(sender, &command.name, command.args.clone(), self.outbox());
        if let Err(e) = handler(&invocation) {
            error!("Command /{} of {} failed: {:#}", command.name, owner, e);
            invocation.reply(format!("An error occurred while running /{}.", command.name));
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventBus")
            .field("chat", &handlers.chat.len())
            .field("anvil", &handlers.anvil.len())
            .field("commands", &handlers.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}
