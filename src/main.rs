//! Librarian Console - command line client for the Data Librarian backend
//!
//! Browses the card catalog, edits backend configuration, and drives the
//! duplicate-weeding job. Catalog and configuration reads are cached
//! locally and survive between invocations.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use librarian_console::api::{ApiClient, Config, Transport, DEFAULT_API_URL};
use librarian_console::cache::{CacheCoordinator, FileStore, IdentityCheck};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Show backend status and reconcile the cached server identity
    Status,
    /// List catalog cards for a path
    Catalog { path: String, refresh: bool },
    /// Show the backend configuration
    ConfigShow { refresh: bool },
    /// Update a single configuration setting
    ConfigSet { target: String, value: String },
    /// Launch the duplicate-weeding job
    Run,
    /// Cancel the running job
    Cancel,
    /// Poll job output until the job stops
    Watch,
    /// Flush local caches
    Flush { target: FlushTarget },
    /// Show help
    Help,
}

#[derive(Debug)]
enum FlushTarget {
    Catalog,
    Config,
    All,
}

fn print_help() {
    eprintln!(
        r#"Librarian Console - client for the Data Librarian backend

USAGE:
    librarian-console status
    librarian-console catalog <path> [--refresh]
    librarian-console config show [--refresh]
    librarian-console config set <section.key> <value>
    librarian-console run
    librarian-console cancel
    librarian-console watch
    librarian-console flush [catalog|config|all]
    librarian-console help

COMMANDS:
    status   Show backend status and reconcile the cached server identity
    catalog  List catalog cards for a path (cached; --refresh forces a fetch)
    config   Show or update the backend configuration (cached)
    run      Launch the duplicate-weeding job
    cancel   Ask a running job to stop
    watch    Stream job output and progress until the job stops
    flush    Drop locally cached catalog entries and/or configuration

EXAMPLES:
    # List the catalog for a shelf, bypassing the local cache
    librarian-console catalog /library/fiction --refresh

    # Move the weeding holding bin
    librarian-console config set weeding.holding_bin /library/holding

ENVIRONMENT:
    LIBRARIAN_API        Backend base URL (default: http://127.0.0.1:8000)
    LIBRARIAN_CACHE_DIR  Directory for the local cache store
    RUST_LOG             Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "status" => Ok(Command::Status),
        "catalog" => {
            let path = args
                .iter()
                .skip(2)
                .find(|a| !a.starts_with("--"))
                .cloned()
                .ok_or_else(|| anyhow!("Usage: librarian-console catalog <path> [--refresh]"))?;
            Ok(Command::Catalog {
                path,
                refresh: args.iter().any(|a| a == "--refresh"),
            })
        }
        "config" => match args.get(2).map(String::as_str) {
            Some("show") | Some("--refresh") | None => Ok(Command::ConfigShow {
                refresh: args.iter().any(|a| a == "--refresh"),
            }),
            Some("set") => {
                if args.len() < 5 {
                    return Err(anyhow!(
                        "Usage: librarian-console config set <section.key> <value>"
                    ));
                }
                Ok(Command::ConfigSet {
                    target: args[3].clone(),
                    value: args[4].clone(),
                })
            }
            Some("flush") => Ok(Command::Flush {
                target: FlushTarget::Config,
            }),
            Some(other) => Err(anyhow!("Unknown config subcommand: {}", other)),
        },
        "run" => Ok(Command::Run),
        "cancel" => Ok(Command::Cancel),
        "watch" => Ok(Command::Watch),
        "flush" => match args.get(2).map(String::as_str) {
            Some("catalog") => Ok(Command::Flush {
                target: FlushTarget::Catalog,
            }),
            Some("config") => Ok(Command::Flush {
                target: FlushTarget::Config,
            }),
            Some("all") | None => Ok(Command::Flush {
                target: FlushTarget::All,
            }),
            Some(other) => Err(anyhow!("Unknown flush target: {}", other)),
        },
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Format a byte count for display (binary units)
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Apply `section.key = value` to a configuration.
///
/// The value is parsed as JSON when possible (numbers, booleans, arrays)
/// and falls back to a plain string otherwise.
fn apply_setting(config: Config, target: &str, raw_value: &str) -> Result<Config> {
    let (section, key) = target
        .split_once('.')
        .ok_or_else(|| anyhow!("Setting must be given as <section>.<key>, e.g. server.port"))?;

    let mut tree = serde_json::to_value(&config)?;
    let section_obj = tree
        .get_mut(section)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| anyhow!("Unknown configuration section: '{}'", section))?;
    if !section_obj.contains_key(key) {
        return Err(anyhow!("Unknown setting '{}' in section '{}'", key, section));
    }

    let value =
        serde_json::from_str(raw_value).unwrap_or_else(|_| Value::String(raw_value.to_string()));
    section_obj.insert(key.to_string(), value);

    serde_json::from_value(tree).map_err(|e| anyhow!("Rejected value for '{}': {}", target, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let base_url = env::var("LIBRARIAN_API").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    let api = ApiClient::new(&base_url).map_err(|e| anyhow!("Failed to create API client: {}", e))?;
    let store = FileStore::open_default()?;
    let console = CacheCoordinator::new(api, store);

    match command {
        Command::Status => {
            let response = console.transport().get_server_status().await;
            if !response.success {
                return Err(anyhow!(
                    "Backend unreachable: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                ));
            }
            let status = response
                .data
                .ok_or_else(|| anyhow!("Backend returned an empty status"))?;

            println!("Backend status: {}", status.status);
            if let Some(message) = &status.message {
                println!("  {}", message);
            }
            if let Some(startup) = &status.startup_time {
                println!("  Startup identity: {}", startup);
            }

            match console.verify_server_identity().await {
                IdentityCheck::RestartDetected { previous, current } => {
                    println!(
                        "  Restart detected ({} -> {}); config cache flushed",
                        previous.as_deref().unwrap_or("first contact"),
                        current
                    );
                }
                IdentityCheck::Unchanged => {
                    println!("  Identity unchanged since last visit");
                }
                IdentityCheck::Skipped => {}
            }
        }

        Command::Catalog { path, refresh } => {
            console.verify_server_identity().await;

            let response = console.get_catalog(&path, refresh).await;
            if !response.success {
                return Err(anyhow!(
                    "Failed to fetch catalog: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                ));
            }

            let cards = response.data.unwrap_or_default();
            if cards.is_empty() {
                println!("No entries under '{}'", path);
            } else {
                println!("{} entries under '{}':", cards.len(), path);
                for card in cards {
                    if card.is_directory {
                        println!("  dir   {:>12}  {}", "-", card.name);
                    } else {
                        println!("  file  {:>12}  {}", format_size(card.size_bytes), card.name);
                    }
                }
            }
        }

        Command::ConfigShow { refresh } => {
            console.verify_server_identity().await;

            let response = console.get_config(refresh).await;
            if !response.success {
                return Err(anyhow!(
                    "Failed to fetch configuration: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                ));
            }
            let config = response
                .data
                .ok_or_else(|| anyhow!("Configuration response was empty"))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Command::ConfigSet { target, value } => {
            console.verify_server_identity().await;

            let response = console.get_config(false).await;
            if !response.success {
                return Err(anyhow!(
                    "Failed to fetch configuration: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                ));
            }
            let config = response
                .data
                .ok_or_else(|| anyhow!("Configuration response was empty"))?;

            let updated = apply_setting(config, &target, &value)?;
            let saved = console.save_config(&updated).await;
            if !saved.success {
                return Err(anyhow!(
                    "Failed to save configuration: {}",
                    saved.error.unwrap_or_else(|| "unknown error".to_string())
                ));
            }
            println!("Configuration saved ({} = {}).", target, value);
        }

        Command::Run => {
            let response = console.transport().run_weeding().await;
            if !response.success {
                return Err(anyhow!(
                    "Failed to launch job: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                ));
            }
            let launch = response
                .data
                .ok_or_else(|| anyhow!("Job launch response was empty"))?;
            match launch.status.as_str() {
                "started" => println!("Weeding job started."),
                "running" => println!("A job is already running."),
                other => println!("Backend replied: {}", other),
            }
            if let Some(log) = launch.log_file_path.filter(|p| !p.is_empty()) {
                println!("Log file: {}", log);
            }
        }

        Command::Cancel => {
            let response = console.transport().cancel_weeding().await;
            if !response.success {
                return Err(anyhow!(
                    "Failed to cancel job: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                ));
            }
            let cancel = response
                .data
                .ok_or_else(|| anyhow!("Cancel response was empty"))?;
            match cancel.status.as_str() {
                "cancelled" => println!("Cancellation requested."),
                "not_running" => println!("No job is running."),
                other => println!("Backend replied: {}", other),
            }
        }

        Command::Watch => {
            println!("Watching job progress (Ctrl+C to stop)...");
            loop {
                let output = console.transport().fetch_job_output().await;
                if output.success {
                    if let Some(chunk) = output.data {
                        for line in &chunk.output {
                            print!("{}", line);
                        }
                        if chunk.output.is_empty() && chunk.total_files > 0 {
                            println!(
                                "  progress: {} / {} files",
                                chunk.files_checked, chunk.total_files
                            );
                        }
                    }
                }

                let status = console.transport().check_job_status().await;
                match status.data {
                    Some(s) if status.success => {
                        if !s.running {
                            println!("Job finished.");
                            if !s.log_file_path.is_empty() {
                                println!("Log file: {}", s.log_file_path);
                            }
                            break;
                        }
                    }
                    _ => println!("Lost contact with backend, retrying..."),
                }

                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        Command::Flush { target } => match target {
            FlushTarget::Catalog => {
                console.flush_catalog();
                println!("Catalog cache flushed.");
            }
            FlushTarget::Config => {
                console.flush_config();
                println!("Config cache flushed.");
            }
            FlushTarget::All => {
                console.flush_catalog();
                console.flush_config();
                println!("Catalog and config caches flushed.");
            }
        },

        Command::Help => {
            print_help();
        }
    }

    Ok(())
}
