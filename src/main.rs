// src/main.rs — plughost entry point

use clap::Parser;

use plughost::cli::{console, status, Cli, Commands};
use plughost::host::Host;
use plughost::infra::config::Config;
use plughost::infra::logger;
use plughost::store::{MetadataStore, SqliteMetadataStore};

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG)
    logger::init_logging("info");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };
    let runtime = config.runtime;

    match cli.command.unwrap_or(Commands::Run { enable: Vec::new() }) {
        Commands::Run { enable } => {
            let host = Host::build(&runtime)?;
            let report = host.start(&enable).await;
            println!("{}", status::format_scan_report(&report));
            host.watch();

            let result = console::run_console(&host).await;
            host.shutdown().await;
            result
        }
        Commands::Scan => {
            let host = Host::build(&runtime)?;
            let report = host.watcher().scan_once().await;
            println!("{}", status::format_scan_report(&report));
            host.shutdown().await;
            Ok(())
        }
        Commands::List => {
            let store = SqliteMetadataStore::open(&runtime.db_path)?;
            println!("{}", status::format_descriptors(&store.list()?));
            Ok(())
        }
        Commands::Forget { name } => {
            let store = SqliteMetadataStore::open(&runtime.db_path)?;
            if store.delete(&name)? {
                println!("{name} forgotten");
            } else {
                println!("{name} had no descriptor");
            }
            Ok(())
        }
    }
}
