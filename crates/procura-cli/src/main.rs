//! procura - command-line companion for the procurement session utilities.
//!
//! Validates product forms, sanitizes text and inspects the stored
//! session token using the same rules as the front-end.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use procura_core::validation::{sanitize_product_form, sanitize_string, validate_product_form};
use procura_core::{
    FileStore, KeyValueStore, KeyringStore, MemoryStore, ProductForm, SessionConfig, TokenManager,
};

// ============================================================================
// Constants
// ============================================================================

/// Durable token store file in the cache directory
const SESSION_FILE: &str = "session.json";

/// Log file name used when `PROCURA_LOG_FILE` is set without a path
const DEFAULT_LOG_FILE: &str = "procura.log";

const USAGE: &str = "\
Usage: procura <command>

Commands:
  validate <form.json>          Validate a product form
  sanitize <text>               Escape markup in free text
  config                        Print the effective configuration
  token status [--keychain]     Show the stored session token
  token clear [--keychain]      Remove the stored session token";

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file_path() {
        Some(path) => {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// `PROCURA_LOG_FILE=<path>` logs to that file; an empty value logs to the cache dir
fn log_file_path() -> Option<PathBuf> {
    let value = std::env::var("PROCURA_LOG_FILE").ok()?;
    if value.trim().is_empty() {
        SessionConfig::cache_dir()
            .ok()
            .map(|dir| dir.join(DEFAULT_LOG_FILE))
    } else {
        Some(PathBuf::from(value))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = SessionConfig::load().context("Failed to load configuration")?;
    debug!(?config, "Loaded configuration");

    match args.first().map(String::as_str) {
        Some("validate") => {
            let path = args.get(1).context("validate requires a form file")?;
            validate(Path::new(path))
        }
        Some("sanitize") => {
            let text = args[1..].join(" ");
            println!("{}", sanitize_string(Some(&text)));
            Ok(())
        }
        Some("config") => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some("token") => {
            let (flags, positional) = split_flags(&args[1..]);
            let keychain = flags.contains(&"--keychain");
            let tokens = token_manager(&config, keychain)?;
            match positional.first().copied() {
                Some("status") => token_status(&tokens),
                Some("clear") => {
                    tokens.clear_token();
                    info!("Cleared stored token");
                    println!("Stored token cleared");
                    Ok(())
                }
                _ => bail!("{}", USAGE),
            }
        }
        Some("help") | Some("--help") | Some("-h") | None => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

/// Separate `--flags` from positional arguments, keeping their order
fn split_flags(args: &[String]) -> (Vec<&str>, Vec<&str>) {
    args.iter()
        .map(String::as_str)
        .partition(|arg| arg.starts_with("--"))
}

fn validate(path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read form file {}", path.display()))?;
    let form: ProductForm = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse form file {}", path.display()))?;

    let result = validate_product_form(&form);
    if result.is_valid {
        println!("Form is valid");
        println!("{}", serde_json::to_string_pretty(&sanitize_product_form(&form))?);
        return Ok(());
    }

    for error in &result.errors {
        println!("- {}", error);
    }
    bail!("Form has {} validation error(s)", result.errors.len())
}

fn token_manager(config: &SessionConfig, keychain: bool) -> Result<TokenManager> {
    let durable: Arc<dyn KeyValueStore> = if keychain {
        Arc::new(KeyringStore::default())
    } else {
        let cache_dir = SessionConfig::cache_dir().context("Failed to locate cache directory")?;
        Arc::new(FileStore::in_dir(&cache_dir, SESSION_FILE))
    };
    Ok(TokenManager::new(Arc::new(MemoryStore::new()), durable, config))
}

fn token_status(tokens: &TokenManager) -> Result<()> {
    let Some(credential) = tokens.credential() else {
        println!("No active token");
        return Ok(());
    };
    let minutes = tokens
        .time_until_expiry()
        .map(|remaining| remaining.num_minutes().max(0))
        .unwrap_or(0);
    println!(
        "Token stored ({:?}), expires in {} minute(s){}",
        credential.store,
        minutes,
        if tokens.needs_refresh() { " - refresh due" } else { "" }
    );
    Ok(())
}
