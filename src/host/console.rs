//! Console host loop - feeds stdin lines to the modules.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::JsonConfig;
use crate::events::{AnvilRepair, ChatMessage, EventBus, Reply};
use crate::module::ModuleRegistry;
use crate::utils::{parse_command, CommandLine};

/// Sender name used for commands typed at the console.
const CONSOLE: &str = "console";

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(CommandLine),
    Chat { sender: String, text: String },
    Anvil(AnvilRepair),
    Modules,
    Reload,
    Enable(String),
    Disable(String),
    Help,
    Empty,
    Invalid(String),
}

/// Parse a console line.
///
/// - `/cmd args` - a command sent by the console
/// - `player: text` - a chat line
/// - `!anvil <player> <item> <cost>`, `!modules`, `!reload`,
///   `!enable <module>`, `!disable <module>`, `!help` - host actions
pub fn parse_input(line: &str) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleInput::Empty;
    }

    if line.starts_with('/') {
        return match parse_command(line) {
            Some(command) => ConsoleInput::Command(command),
            None => ConsoleInput::Invalid("empty command".to_string()),
        };
    }

    if let Some(action) = line.strip_prefix('!') {
        let parts: Vec<&str> = action.split_whitespace().collect();
        return match parts.as_slice() {
            ["modules"] => ConsoleInput::Modules,
            ["reload"] => ConsoleInput::Reload,
            ["help"] => ConsoleInput::Help,
            ["enable", name] => ConsoleInput::Enable(name.to_string()),
            ["disable", name] => ConsoleInput::Disable(name.to_string()),
            ["anvil", player, item, cost] => match cost.parse::<u32>() {
                Ok(cost) => ConsoleInput::Anvil(AnvilRepair {
                    player: player.to_string(),
                    item: item.to_string(),
                    cost,
                }),
                Err(_) => ConsoleInput::Invalid(format!("'{}' is not a valid cost", cost)),
            },
            _ => ConsoleInput::Invalid(format!("unknown action '!{}'", action)),
        };
    }

    match line.split_once(':') {
        Some((sender, text)) if !sender.trim().is_empty() && !sender.contains(' ') => {
            ConsoleInput::Chat {
                sender: sender.trim().to_string(),
                text: text.trim().to_string(),
            }
        }
        _ => ConsoleInput::Invalid("expected '/command', 'player: text' or '!action'".to_string()),
    }
}

/// Everything the console loop drives.
pub struct Console {
    pub registry: ModuleRegistry,
    pub config: Arc<JsonConfig>,
    pub events: EventBus,
}

impl Console {
    /// Execute one input and return what to print.
    pub fn handle(&self, input: ConsoleInput) -> Option<String> {
        match input {
            ConsoleInput::Empty => None,
            ConsoleInput::Invalid(reason) => Some(format!("Invalid input: {}", reason)),
            ConsoleInput::Help => Some(HELP.to_string()),
            ConsoleInput::Command(command) => {
                match self.events.dispatch_command(CONSOLE, &command) {
                    Ok(()) => None,
                    Err(e) => Some(e.to_string()),
                }
            }
            ConsoleInput::Chat { sender, text } => {
                let mut msg = ChatMessage::new(sender, text);
                self.events.dispatch_chat(&mut msg);
                Some(msg.render())
            }
            ConsoleInput::Anvil(mut repair) => {
                let requested = repair.cost;
                self.events.dispatch_anvil(&mut repair);
                Some(format!(
                    "{} repairs {}: cost {} (requested {})",
                    repair.player, repair.item, repair.cost, requested
                ))
            }
            ConsoleInput::Modules => {
                let lines: Vec<String> = self
                    .registry
                    .states()
                    .into_iter()
                    .map(|(name, state)| match self.registry.last_error(&name) {
                        Some(e) => format!("  {} [{}] last error: {}", name, state, e),
                        None => format!("  {} [{}]", name, state),
                    })
                    .collect();
                Some(format!("Modules:\n{}", lines.join("\n")))
            }
            ConsoleInput::Reload => {
                self.config.reload();
                Some(self.registry.reload_all().to_string())
            }
            ConsoleInput::Enable(name) => Some(match self.registry.enable_module(&name) {
                Ok(()) => format!("Enabled {}", name),
                Err(e) => format!("Could not enable {}: {}", name, e),
            }),
            ConsoleInput::Disable(name) => Some(match self.registry.disable_module(&name) {
                Ok(report) => report.to_string(),
                Err(e) => format!("Could not disable {}: {}", name, e),
            }),
        }
    }

    /// Read stdin until EOF or Ctrl-C, printing results and module replies.
    pub async fn run(&self, mut replies: mpsc::UnboundedReceiver<Reply>) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("Console ready, type !help for usage");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            if let Some(output) = self.handle(parse_input(&line)) {
                                println!("{}", output.trim_end());
                            }
                        }
                        None => {
                            info!("Console input closed");
                            break;
                        }
                    }
                }
                Some(reply) = replies.recv() => {
                    println!("[to {}] {}", reply.recipient, reply.text);
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                    }
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }
}

const HELP: &str = "\
/command args...              run a module command as the console
player: text                  send a chat line
!anvil <player> <item> <cost> price an anvil repair
!modules                      list modules and their state
!reload                       re-read config and reload every module
!enable <module>              enable a module
!disable <module>             disable a module and its dependents";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleState;
    use crate::plugins::builtin_modules;
    use serde_json::json;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), ConsoleInput::Empty);
        assert_eq!(
            parse_input("alice: hello there"),
            ConsoleInput::Chat {
                sender: "alice".into(),
                text: "hello there".into()
            }
        );
        assert_eq!(parse_input("!modules"), ConsoleInput::Modules);
        assert_eq!(parse_input("!disable geo"), ConsoleInput::Disable("geo".into()));
        assert_eq!(
            parse_input("!anvil bob sword 50"),
            ConsoleInput::Anvil(AnvilRepair {
                player: "bob".into(),
                item: "sword".into(),
                cost: 50
            })
        );
        assert!(matches!(parse_input("!anvil bob sword lots"), ConsoleInput::Invalid(_)));
        assert!(matches!(parse_input("just words"), ConsoleInput::Invalid(_)));
        assert!(matches!(parse_input("/rank alice"), ConsoleInput::Command(c) if c.name == "rank"));
    }

    fn console() -> Console {
        let config = Arc::new(JsonConfig::from_value(json!({
            "anvil": { "max-cost": 30 },
            "chat-filter": { "replacements": { "darn": "drat" } }
        })));
        let (events, _replies) = EventBus::new();
        let registry = ModuleRegistry::new(config.clone(), events.clone());
        for module in builtin_modules() {
            registry.register(module).unwrap();
        }
        registry.load_all();
        registry.enable_all();
        Console { registry, config, events }
    }

    #[test]
    fn test_handle_drives_modules() {
        let console = console();

        let chat = console.handle(parse_input("bob: darn")).unwrap();
        assert_eq!(chat, "bob: drat");

        let anvil = console.handle(parse_input("!anvil bob sword 50")).unwrap();
        assert_eq!(anvil, "bob repairs sword: cost 30 (requested 50)");

        let unknown = console.handle(parse_input("/nothing")).unwrap();
        assert_eq!(unknown, "unknown command '/nothing'");
    }

    #[test]
    fn test_admin_actions() {
        let console = console();

        let report = console.handle(parse_input("!disable ranks")).unwrap();
        assert!(report.contains("chat-filter"));
        assert_eq!(console.registry.state("chat-filter"), Some(ModuleState::Disabled));

        let refused = console.handle(parse_input("!enable chat-filter")).unwrap();
        assert!(refused.contains("dependency unresolved: ranks"));

        assert_eq!(console.handle(parse_input("!enable ranks")).unwrap(), "Enabled ranks");
        assert_eq!(
            console.handle(parse_input("!enable chat-filter")).unwrap(),
            "Enabled chat-filter"
        );

        let reload = console.handle(parse_input("!reload")).unwrap();
        assert!(reload.starts_with("reload: 4 succeeded, 0 failed"));

        let modules = console.handle(parse_input("!modules")).unwrap();
        assert!(modules.contains("geo [enabled]"));
    }
}
