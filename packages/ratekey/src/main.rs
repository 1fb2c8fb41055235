use std::time::Duration;

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use derive_more::Debug;
use http::{HeaderMap, HeaderName, HeaderValue, header::AUTHORIZATION};
use ratekey::{
    key::{Category, derive_key},
    rate_limit::Limit,
};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print the bucket key a request is counted against
    Derive(RequestConfig),

    /// Replay a request against a fresh limiter and report which attempts pass
    Simulate(SimulateConfig),
}

#[derive(clap::Args, Debug)]
struct RequestConfig {
    /// Rate limit category
    #[arg(long, short)]
    category: String,

    /// Value of the Authorization header
    #[arg(long, short)]
    #[debug(ignore)]
    authorization: Option<String>,

    /// Additional request header, as `name: value`
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    #[debug(ignore)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// Network address of the peer
    #[arg(long)]
    addr: Option<String>,
}

impl RequestConfig {
    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(authorization) = &self.authorization {
            let value = HeaderValue::from_str(authorization).context("parse authorization value")?;
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        Ok(headers)
    }

    fn category(&self) -> Category {
        Category::new(self.category.clone())
    }
}

#[derive(clap::Args, Debug)]
struct SimulateConfig {
    #[command(flatten)]
    request: RequestConfig,

    /// Number of requests to replay
    #[arg(long, short = 'n', default_value = "36")]
    requests: u32,

    /// Milliseconds it takes to replenish one request
    #[arg(long, env = "RATEKEY_PERIOD_MS", default_value = "72000")]
    period_ms: u64,

    /// Number of requests admitted back to back
    #[arg(long, env = "RATEKEY_BURST", default_value = "50")]
    burst: u32,
}

impl SimulateConfig {
    fn limit(&self) -> Limit {
        Limit::new(Duration::from_millis(self.period_ms), self.burst)
    }
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("expected `name: value`, got {raw:?}"));
    };
    let name = HeaderName::try_from(name.trim()).map_err(|err| format!("header name: {err}"))?;
    let value = value.strip_prefix(' ').unwrap_or(value);
    let value = HeaderValue::try_from(value).map_err(|err| format!("header value: {err}"))?;
    Ok((name, value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_tree::HierarchicalLayer::default()
                .with_indent_lines(true)
                .with_indent_amount(2)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_verbose_exit(false)
                .with_verbose_entry(false)
                .with_deferred_spans(true)
                .with_bracketed_fields(true)
                .with_timer(tracing_tree::time::Uptime::default())
                .with_targets(false),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("RATEKEY_LOG")
                .from_env_lossy(),
        )
        .init();

    match cli.command {
        Command::Derive(config) => derive(config),
        Command::Simulate(config) => simulate(config),
    }
}

#[tracing::instrument]
fn derive(config: RequestConfig) -> Result<()> {
    let headers = config.header_map()?;
    let key = derive_key(&headers, config.addr.as_deref(), &config.category());
    println!("{}", key.expose());
    Ok(())
}

#[tracing::instrument]
fn simulate(config: SimulateConfig) -> Result<()> {
    let limiter = config.limit().limiter().context("build limiter")?;
    let headers = config.request.header_map()?;
    let category = config.request.category();

    let mut allowed = 0;
    for attempt in 1..=config.requests {
        let key = derive_key(&headers, config.request.addr.as_deref(), &category);
        let outcome = match limiter.check_key(&key) {
            Ok(()) => {
                allowed += 1;
                "allowed"
            }
            Err(_) => "limited",
        };
        if attempt == 1 {
            println!("bucket {}", key.expose());
        }
        println!("{attempt:>4} {outcome}");
    }

    tracing::info!(allowed, total = config.requests, "simulation complete");
    println!("{allowed}/{} requests allowed", config.requests);
    Ok(())
}
