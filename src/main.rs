use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hivegate::config::{HivegateConfig, LoggingConfig};
use hivegate::ratelimit::{RateLimiter, RequestDescriptor};

#[derive(Parser, Debug)]
#[command(name = "hivegate", version, about = "Adaptive request rate limiting")]
struct Cli {
    /// Configuration file (YAML); `HIVEGATE__*` environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configuration and print the compiled rule table
    Validate,

    /// Run simulated requests through the limiter and print each decision
    Check {
        #[arg(long)]
        path: String,

        #[arg(long)]
        method: Option<String>,

        /// Transport-level peer address
        #[arg(long)]
        ip: Option<IpAddr>,

        /// X-Forwarded-For header value
        #[arg(long)]
        forwarded_for: Option<String>,

        /// X-Real-IP header value
        #[arg(long)]
        real_ip: Option<String>,

        /// Authenticated user id
        #[arg(long)]
        user: Option<String>,

        /// Number of requests to send
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Pause between requests, in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HivegateConfig::from_file(path)?,
        None => HivegateConfig::from_env()?,
    };

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = RateLimiter::from_config(&config).await?;

    match cli.command {
        Command::Validate => {
            let rules = limiter.rules();
            println!("store: {}", limiter.store_name().unwrap_or("fallback-only"));
            for (name, pattern, methods, rule) in rules.routes() {
                let methods = if methods.is_empty() {
                    "*".to_string()
                } else {
                    methods.join(",")
                };
                println!(
                    "{:<16} {:<32} {:<10} {} {}/{}s scope={} burst={}",
                    name,
                    pattern,
                    methods,
                    rule.algorithm,
                    rule.max_requests,
                    rule.window_seconds,
                    rule.scope,
                    rule.effective_burst()
                );
            }
            let default = rules.default_rule();
            println!(
                "{:<16} {:<32} {:<10} {} {}/{}s scope={} burst={}",
                "default",
                "*",
                "*",
                default.algorithm,
                default.max_requests,
                default.window_seconds,
                default.scope,
                default.effective_burst()
            );
        }
        Command::Check {
            path,
            method,
            ip,
            forwarded_for,
            real_ip,
            user,
            count,
            interval_ms,
        } => {
            let request = RequestDescriptor {
                path,
                method,
                peer_addr: ip,
                forwarded_for,
                real_ip,
                user_id: user,
            };

            let _reporter = config
                .analytics
                .report_interval_secs
                .map(|secs| limiter.analytics_handle().spawn_reporter(Duration::from_secs(secs)));
            let _sweeper = limiter
                .fallback_handle()
                .spawn_sweeper(limiter.clock(), config.fallback.sweep_interval());

            for i in 1..=count {
                let (allowed, decision) = limiter.check_request(&request).await;
                let mut headers: Vec<_> = limiter.build_headers(&decision).into_iter().collect();
                headers.sort();
                let headers: Vec<String> = headers
                    .into_iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect();

                println!(
                    "#{:<4} {:<5} {}",
                    i,
                    if allowed { "ALLOW" } else { "DENY" },
                    headers.join(" ")
                );

                if interval_ms > 0 && i < count {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }

            println!("{}", serde_json::to_string_pretty(&limiter.analytics())?);
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
