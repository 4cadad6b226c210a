// src/cli/mod.rs — CLI definition (clap derive)

pub mod console;
pub mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "plughost", about = "Hot-reloading WASM plugin host", version)]
pub struct Cli {
    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Commands {
    /// Run the host: initial scan, periodic watching and an operator console
    Run {
        /// Enable this plugin after the initial scan (repeatable)
        #[arg(long = "enable", value_name = "NAME")]
        enable: Vec<String>,
    },
    /// Scan the artifact directory once and print what happened
    Scan,
    /// List persisted plugin descriptors
    List,
    /// Delete a plugin's descriptor
    Forget {
        /// Plugin name
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_enables() {
        let cli = Cli::parse_from(["plughost", "run", "--enable", "Echo", "--enable", "Clock"]);
        assert_eq!(
            cli.command,
            Some(Commands::Run {
                enable: vec!["Echo".into(), "Clock".into()]
            })
        );
    }

    #[test]
    fn test_parse_config_and_forget() {
        let cli = Cli::parse_from(["plughost", "--config", "/etc/plughost.toml", "forget", "Echo"]);
        assert_eq!(cli.config.as_deref(), Some("/etc/plughost.toml"));
        assert_eq!(
            cli.command,
            Some(Commands::Forget {
                name: "Echo".into()
            })
        );
    }

    #[test]
    fn test_no_subcommand() {
        let cli = Cli::parse_from(["plughost"]);
        assert!(cli.command.is_none());
    }
}
