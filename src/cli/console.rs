// src/cli/console.rs — Operator console read from stdin while the host runs

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::status;
use crate::host::Host;
use crate::runtime::events::HostEvent;

const HELP: &str = "\
commands:
  list                 live plugins
  enable NAME          enable a loaded plugin
  disable NAME         disable (applies a pending update)
  unload NAME          discard a disabled plugin
  forget NAME          unload and delete the descriptor
  pending              show pending updates
  apply-pending        disable, update and re-enable plugins with pending updates
  scan                 run one watch cycle now
  cmd NAME [ARGS]      run a plugin command
  event KIND [JSON]    dispatch a host event
  quit                 shut down";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    List,
    Enable(String),
    Disable(String),
    Unload(String),
    Forget(String),
    Pending,
    ApplyPending,
    Scan,
    Cmd { name: String, args: String },
    Event { kind: String, payload: serde_json::Value },
    Help,
    Quit,
}

/// Parse one console line. `Ok(None)` for a blank line.
pub fn parse_console_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let name = |what: &str| -> Result<String, String> {
        if rest.is_empty() {
            Err(format!("usage: {what} NAME"))
        } else {
            Ok(rest.to_string())
        }
    };

    let command = match verb {
        "list" | "ls" => ConsoleCommand::List,
        "enable" => ConsoleCommand::Enable(name("enable")?),
        "disable" => ConsoleCommand::Disable(name("disable")?),
        "unload" => ConsoleCommand::Unload(name("unload")?),
        "forget" => ConsoleCommand::Forget(name("forget")?),
        "pending" => ConsoleCommand::Pending,
        "apply-pending" => ConsoleCommand::ApplyPending,
        "scan" => ConsoleCommand::Scan,
        "cmd" => {
            let (name, args) = match rest.split_once(char::is_whitespace) {
                Some((name, args)) => (name, args.trim()),
                None => (rest, ""),
            };
            if name.is_empty() {
                return Err("usage: cmd NAME [ARGS]".into());
            }
            ConsoleCommand::Cmd {
                name: name.to_string(),
                args: args.to_string(),
            }
        }
        "event" => {
            let (kind, json) = match rest.split_once(char::is_whitespace) {
                Some((kind, json)) => (kind, json.trim()),
                None => (rest, ""),
            };
            if kind.is_empty() {
                return Err("usage: event KIND [JSON]".into());
            }
            let payload = if json.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(json).map_err(|e| format!("invalid JSON payload: {e}"))?
            };
            ConsoleCommand::Event {
                kind: kind.to_string(),
                payload,
            }
        }
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}

/// Execute a console command against the host and render the result.
pub async fn execute(host: &Host, command: ConsoleCommand) -> String {
    let registry = host.registry();
    match command {
        ConsoleCommand::List => status::format_views(&registry.live_plugins().await),
        ConsoleCommand::Enable(name) => match registry.enable(&name).await {
            Ok(view) => format!("{} v{} enabled", view.info.name, view.info.version),
            Err(e) => format!("error: {e}"),
        },
        ConsoleCommand::Disable(name) => {
            let result = registry.disable(&name).await;
            let now = match registry.get(&name).await {
                Some(view) => format!("{} v{} is {}", view.info.name, view.info.version, view.state),
                None => format!("{name} is not loaded"),
            };
            match result {
                Ok(()) => now,
                Err(e) => format!("{now}\nwarning: {e}"),
            }
        }
        ConsoleCommand::Unload(name) => match registry.unload(&name).await {
            Ok(()) => format!("{name} unloaded"),
            Err(e) => format!("error: {e}"),
        },
        ConsoleCommand::Forget(name) => match registry.forget(&name).await {
            Ok(true) => format!("{name} forgotten"),
            Ok(false) => format!("{name} had no descriptor"),
            Err(e) => format!("error: {e}"),
        },
        ConsoleCommand::Pending => status::format_pending(&registry.pending().list()),
        ConsoleCommand::ApplyPending => {
            let outcomes = host.watcher().apply_all_pending_updates().await;
            if outcomes.is_empty() {
                return "No pending updates.".into();
            }
            outcomes
                .into_iter()
                .map(|(name, outcome)| match outcome {
                    Ok(view) => format!("{name}: now v{} ({})", view.info.version, view.state),
                    Err(e) => format!("{name}: {e}"),
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        ConsoleCommand::Scan => status::format_scan_report(&host.watcher().scan_once().await),
        ConsoleCommand::Cmd { name, args } => match registry.execute_command(&name, &args) {
            Ok(reply) => reply,
            Err(e) => format!("error: {e}"),
        },
        ConsoleCommand::Event { kind, payload } => {
            let report = registry
                .dispatch(HostEvent::new(kind, payload, "console"))
                .await;
            status::format_dispatch(&report)
        }
        ConsoleCommand::Help => HELP.into(),
        ConsoleCommand::Quit => "bye".into(),
    }
}

/// Read commands from stdin until `quit`, EOF or Ctrl-C.
pub async fn run_console(host: &Host) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("plughost console ready; type 'help' for commands");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        match parse_console_command(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => println!("{}", execute(host, command).await),
            Err(message) => eprintln!("{message}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> ConsoleCommand {
        parse_console_command(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("list"), ConsoleCommand::List);
        assert_eq!(parse("  enable Echo  "), ConsoleCommand::Enable("Echo".into()));
        assert_eq!(parse("apply-pending"), ConsoleCommand::ApplyPending);
        assert_eq!(parse("quit"), ConsoleCommand::Quit);
        assert_eq!(parse_console_command("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_cmd_keeps_argument_text() {
        assert_eq!(
            parse("cmd echo hello   world"),
            ConsoleCommand::Cmd {
                name: "echo".into(),
                args: "hello   world".into()
            }
        );
        assert_eq!(
            parse("cmd ping"),
            ConsoleCommand::Cmd {
                name: "ping".into(),
                args: String::new()
            }
        );
    }

    #[test]
    fn test_parse_event_payload() {
        assert_eq!(
            parse(r#"event chat.message {"text":"hi"}"#),
            ConsoleCommand::Event {
                kind: "chat.message".into(),
                payload: serde_json::json!({"text": "hi"})
            }
        );
        assert_eq!(
            parse("event tick"),
            ConsoleCommand::Event {
                kind: "tick".into(),
                payload: serde_json::Value::Null
            }
        );
        assert!(parse_console_command("event tick {oops")
            .unwrap_err()
            .starts_with("invalid JSON payload"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_console_command("enable").unwrap_err(), "usage: enable NAME");
        assert_eq!(parse_console_command("cmd").unwrap_err(), "usage: cmd NAME [ARGS]");
        assert!(parse_console_command("reboot")
            .unwrap_err()
            .contains("unknown command 'reboot'"));
    }
}
