mod cli;

use std::path::Path;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;
use vodvault::config::Config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing. Respect RUST_LOG env var; otherwise use
    // defaults based on the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vodvault=trace,vodvault_db=debug,vodvault_storage=debug,tower_http=debug".to_string()
        } else {
            "vodvault=info,tower_http=info".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::GenerateToken { usr_id, label } => {
            generate_token(cli.config.as_deref(), usr_id, label.as_deref())
        }
        Commands::Version => {
            println!("vodvault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn start_server(
    host: String,
    port: u16,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load_or_default(config_path);
    config.server.host = host;
    config.server.port = port;

    for warning in config.validate() {
        tracing::warn!("config: {warning}");
    }
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    vodvault::server::start(config).await?;
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)?;
            let config = Config::from_toml(&contents)?;

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid");
            } else {
                for w in &warnings {
                    println!("  Warning: {}", w);
                }
            }
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Database: {}", config.database.path);
            println!("  Storage base: {}", config.storage.base_path.display());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }
    Ok(())
}

fn generate_token(
    config_path: Option<&Path>,
    usr_id: u32,
    label: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    use rand::Rng;

    let config = Config::load_or_default(config_path);
    let pool = vodvault_db::pool::init_pool(&config.database.path)?;
    let conn = vodvault_db::pool::get_conn(&pool)?;

    let mut buf = [0u8; 32];
    rand::thread_rng().fill(&mut buf);
    let hex_str: String = buf.iter().map(|b| format!("{b:02x}")).collect();
    let token = format!("vv-{hex_str}");

    vodvault_db::queries::auth_tokens::issue_token(
        &conn,
        vodvault_common::UserId::new(usr_id),
        &token,
        label,
    )?;
    println!("{token}");
    Ok(())
}
