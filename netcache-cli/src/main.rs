use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use netcache::cache::{AdaptiveCache, DeviceProfile, TtlCache};
use netcache::config::{LogFormat, LoggingConfig, NetcacheConfig};
use netcache::core::{SharedClock, system_clock};
use netcache::network::{
    HttpTransport, NetworkRequest, NetworkResponse, Priority, RequestScheduler,
};
use netcache::persistence::{FileStore, MemoryStore, SharedStore};
use regex::Regex;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netcache-cli")]
#[command(about = "netcache CLI - cached, prioritized HTTP requests", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Directory for the file-backed store (overrides the config file)
    #[arg(short = 's', long)]
    store_dir: Option<PathBuf>,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

/// Components wired together for one CLI session
struct App {
    scheduler: RequestScheduler,
    cache: AdaptiveCache,
    values: TtlCache<Value>,
}

impl App {
    async fn build(config: &NetcacheConfig) -> Result<Self> {
        let store: SharedStore = match &config.persistence.directory {
            Some(dir) => Arc::new(
                FileStore::open(dir.clone())
                    .await
                    .with_context(|| format!("opening store at {}", dir.display()))?,
            ),
            None => Arc::new(MemoryStore::new()),
        };
        let clock: SharedClock = system_clock();

        let cache = AdaptiveCache::new(
            config.adaptive_cache.clone(),
            Arc::clone(&store),
            Arc::clone(&clock),
        )?;
        cache.reconcile_store().await;
        let values = TtlCache::new(config.ttl_cache.clone(), store, Arc::clone(&clock))?;
        let restored = values.rehydrate().await;
        if restored > 0 {
            info!("Restored {} cached values", restored);
        }
        values.start_sweeper();

        let transport = Arc::new(HttpTransport::new()?);
        let scheduler =
            RequestScheduler::new(config.scheduler.clone(), cache.clone(), transport, clock)?;

        Ok(Self {
            scheduler,
            cache,
            values,
        })
    }

    async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "GET" | "FETCH" => self.cmd_get(args).await?,
            "BATCH" => self.cmd_batch(args).await?,
            "SET" => self.cmd_set(args).await?,
            "CGET" => self.cmd_cget(args)?,
            "DEL" | "DELETE" => self.cmd_del(args).await?,
            "PURGE" => self.cmd_purge(args).await?,
            "STATS" | "INFO" => self.cmd_stats()?,
            "POOLS" => self.cmd_pools(),
            "METRICS" => netcache::metrics::encode_metrics()
                .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?,
            "CLEAR" => self.cmd_clear().await,
            "PROFILE" => self.cmd_profile(args).await?,
            "PRESSURE" => {
                self.cache.handle_memory_pressure().await;
                "OK".green().to_string()
            }
            "HELP" => help_text(),
            _ => return Err(anyhow::anyhow!("Unknown command: {}", command)),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    async fn cmd_get(&self, args: &[String]) -> Result<String> {
        let Some(url) = args.first() else {
            return Err(anyhow::anyhow!("Usage: GET url [priority]"));
        };
        let priority = match args.get(1) {
            Some(p) => p.parse::<Priority>().map_err(anyhow::Error::msg)?,
            None => Priority::Normal,
        };

        let response = self
            .scheduler
            .submit(NetworkRequest::get(url.as_str()).with_priority(priority))
            .await?;
        Ok(format_response(&response))
    }

    async fn cmd_batch(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: BATCH url [url ...]"));
        }

        let requests = args
            .iter()
            .map(|url| NetworkRequest::get(url.as_str()))
            .collect();
        let results = self.scheduler.submit_batch(requests).await;

        let output = args
            .iter()
            .zip(results)
            .enumerate()
            .map(|(i, (url, result))| match result {
                Ok(response) => format!(
                    "{}) {} {}{}",
                    i + 1,
                    url,
                    status_label(response.status_code),
                    if response.served_from_cache {
                        " (cached)".dimmed().to_string()
                    } else {
                        String::new()
                    }
                ),
                Err(e) => format!("{}) {} {}", i + 1, url, e.to_string().red()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(output)
    }

    async fn cmd_set(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: SET key value [ttl_ms]"));
        }

        // Values that are not valid JSON are stored as strings
        let value =
            serde_json::from_str(&args[1]).unwrap_or_else(|_| Value::String(args[1].clone()));
        let ttl = match args.get(2) {
            Some(ms) => Some(Duration::from_millis(
                ms.parse::<u64>().context("ttl_ms must be a number")?,
            )),
            None => None,
        };

        self.values.set(&args[0], value, ttl, None).await;
        Ok("OK".green().to_string())
    }

    fn cmd_cget(&self, args: &[String]) -> Result<String> {
        let Some(key) = args.first() else {
            return Err(anyhow::anyhow!("Usage: CGET key"));
        };

        Ok(match self.values.get(key) {
            Some(value) => serde_json::to_string_pretty(&value)?,
            None => "(nil)".dimmed().to_string(),
        })
    }

    async fn cmd_del(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DEL key [key ...]"));
        }

        let mut deleted = 0;
        for key in args {
            if self.values.delete(key).await {
                deleted += 1;
            }
        }
        Ok(format!("(integer) {}", deleted))
    }

    async fn cmd_purge(&self, args: &[String]) -> Result<String> {
        let Some(pattern) = args.first() else {
            return Err(anyhow::anyhow!("Usage: PURGE regex"));
        };
        let regex = Regex::new(pattern).context("invalid pattern")?;
        let removed = self.values.clear_by_pattern(&regex).await;
        Ok(format!("(integer) {}", removed))
    }

    fn cmd_stats(&self) -> Result<String> {
        let scheduler = self.scheduler.stats();
        let adaptive = self.cache.stats();
        let values = self.values.stats();

        Ok(format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}",
            "# Scheduler".bold(),
            serde_json::to_string_pretty(&scheduler)?,
            format!(
                "average_response_time_ms: {:.2}",
                scheduler.average_response_time_ms()
            )
            .dimmed(),
            "# Response cache".bold(),
            serde_json::to_string_pretty(&adaptive)?,
            "# Value cache".bold(),
            serde_json::to_string_pretty(&values)?,
        ))
    }

    fn cmd_pools(&self) -> String {
        let pools = self.scheduler.pool_stats();
        if pools.is_empty() {
            return "(empty)".dimmed().to_string();
        }
        pools
            .iter()
            .map(|pool| {
                format!(
                    "{}  {}/{}",
                    pool.host.cyan(),
                    pool.current_connections,
                    pool.max_connections
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn cmd_clear(&self) -> String {
        self.scheduler.clear_cache().await;
        self.values.clear().await;
        "OK".green().to_string()
    }

    async fn cmd_profile(&self, args: &[String]) -> Result<String> {
        let profile = match args.first().map(|s| s.to_lowercase()).as_deref() {
            Some("low") => DeviceProfile::Low,
            Some("standard") => DeviceProfile::Standard,
            Some("high") => DeviceProfile::High,
            _ => return Err(anyhow::anyhow!("Usage: PROFILE low|standard|high")),
        };
        self.cache.configure_for_environment(profile).await?;
        let config = self.cache.config();
        Ok(format!(
            "{} max_bytes={} compression_threshold_bytes={}",
            "OK".green(),
            config.max_bytes,
            config.compression_threshold_bytes
        ))
    }
}

fn status_label(status: u16) -> String {
    let label = status.to_string();
    if (200..300).contains(&status) {
        label.green().to_string()
    } else {
        label.yellow().to_string()
    }
}

fn format_response(response: &NetworkResponse) -> String {
    let mut header = format!(
        "{} {:.2?}",
        status_label(response.status_code),
        response.response_time
    );
    if response.served_from_cache {
        header.push_str(&" (cached)".dimmed().to_string());
    }
    if response.retry_count > 0 {
        header.push_str(&format!(" retries={}", response.retry_count));
    }

    let body = match response.json::<Value>() {
        Ok(json) => serde_json::to_string_pretty(&json).unwrap_or_else(|_| response.text()),
        Err(_) => response.text(),
    };
    format!("{}\n{}", header, body)
}

fn help_text() -> String {
    format!(
        r#"{}

{}
  GET url [priority]         Fetch through the scheduler (critical|high|normal|low)
  BATCH url [url ...]        Fetch several URLs in paced batches
  CLEAR                      Drop all cached responses and values
  PROFILE low|standard|high  Resize the response cache for a device profile
  PRESSURE                   Simulate a low-memory signal

{}
  SET key value [ttl_ms]     Store a JSON (or string) value
  CGET key                   Read a stored value
  DEL key [key ...]          Delete values
  PURGE regex                Delete values whose key matches

{}
  STATS                      Scheduler and cache statistics
  POOLS                      Per-host connection pools
  METRICS                    Prometheus metrics
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
        "netcache CLI - Available Commands".bold().cyan(),
        "Network Commands:".bold(),
        "Value Cache Commands:".bold(),
        "Diagnostics:".bold(),
    )
}

/// Initialize tracing from the logging section; `RUST_LOG` takes precedence
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NetcacheConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NetcacheConfig::default(),
    };
    if let Some(dir) = args.store_dir {
        config.persistence.directory = Some(dir);
    }

    init_tracing(&config.logging);
    let app = App::build(&config).await?;

    // Check if running in command mode or interactive mode
    if !args.command.is_empty() {
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match app.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(app).await
    }
}

async fn run_interactive(app: App) -> Result<()> {
    info!(
        "{}",
        format!("netcache CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{}> ", "netcache".green());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let Some(cmd) = parts.first() else {
                    continue;
                };
                rl.add_history_entry(&line)?;

                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match app.execute_command(cmd, &parts[1..]).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_command_mode() {
        let args = Args::parse_from([
            "netcache-cli",
            "--store-dir",
            "/tmp/nc",
            "GET",
            "http://x/",
        ]);
        assert_eq!(args.store_dir, Some(PathBuf::from("/tmp/nc")));
        assert_eq!(args.command, vec!["GET", "http://x/"]);
        assert!(args.config.is_none());
    }

    #[tokio::test]
    async fn test_value_commands() {
        let app = App::build(&NetcacheConfig::default()).await.unwrap();

        app.execute_command("SET", &["user".into(), r#"{"id":1}"#.into()])
            .await
            .unwrap();
        let out = app.execute_command("CGET", &["user".into()]).await.unwrap();
        assert!(out.contains("\"id\": 1"));

        let out = app.execute_command("DEL", &["user".into()]).await.unwrap();
        assert!(out.starts_with("(integer) 1"));
        let out = app.execute_command("CGET", &["user".into()]).await.unwrap();
        assert!(out.contains("(nil)"));
    }

    #[tokio::test]
    async fn test_unknown_and_usage_errors() {
        let app = App::build(&NetcacheConfig::default()).await.unwrap();
        assert!(app.execute_command("NOPE", &[]).await.is_err());
        assert!(app.execute_command("GET", &[]).await.is_err());
        assert!(
            app.execute_command("PROFILE", &["tiny".into()])
                .await
                .is_err()
        );
        assert!(
            app.execute_command("GET", &["http://h/".into(), "urgent".into()])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_profile_command() {
        let app = App::build(&NetcacheConfig::default()).await.unwrap();
        app.execute_command("PROFILE", &["low".into()]).await.unwrap();
        assert_eq!(app.cache.config().max_bytes, 10 * 1024 * 1024);
    }
}
