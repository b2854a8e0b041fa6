use anyhow::{Context, Result};
use clap::Parser;
use grandaviator_execution::PhaseConfig;
use grandaviator_server::{
    balance::HttpBalanceClient, cache::RedisRoundStore, fanout::RedisFanout,
    ledger_persistence::SqliteLedger, Api, Aviator, EngineConfig, Production, ServerConfig,
};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name = std::env::var("OTEL_SERVICE_NAME")
            .unwrap_or_else(|_| "grandaviator-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("grandaviator-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Redis URL of the round store and event channel (falls back to AVIATOR_REDIS_URL).
    #[arg(long)]
    redis_url: Option<String>,

    /// Prefix prepended to every round store key.
    #[arg(long)]
    redis_prefix: Option<String>,

    /// Redis pub/sub channel events are published on.
    #[arg(long)]
    events_channel: Option<String>,

    /// Path to the SQLite ledger.
    #[arg(long)]
    ledger_path: Option<PathBuf>,

    /// Base URL of the balance service (falls back to AVIATOR_BALANCE_URL).
    #[arg(long)]
    balance_url: Option<String>,

    /// Source label attached to balance adjustments.
    #[arg(long)]
    service_name: Option<String>,

    #[arg(long)]
    countdown_ms: Option<u64>,

    /// Interval between loading broadcasts during the countdown.
    #[arg(long)]
    countdown_step_ms: Option<u64>,

    #[arg(long)]
    tick_ms: Option<u64>,

    /// Pause after an explosion before the next flight.
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Explosion multipliers kept per organization.
    #[arg(long)]
    history_capacity: Option<usize>,

    /// Seed for every engine RNG (optional; entropy when omitted).
    #[arg(long)]
    seed: Option<u64>,
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .and_then(|value| (!value.trim().is_empty()).then_some(value.trim().to_string()))
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    let phases = PhaseConfig {
        countdown_ms: args.countdown_ms.unwrap_or(defaults.engine.phases.countdown_ms),
        countdown_step_ms: args
            .countdown_step_ms
            .unwrap_or(defaults.engine.phases.countdown_step_ms),
        tick_ms: args.tick_ms.unwrap_or(defaults.engine.phases.tick_ms),
        cooldown_ms: args.cooldown_ms.unwrap_or(defaults.engine.phases.cooldown_ms),
    };
    phases.validate().map_err(anyhow::Error::msg)?;
    let history_capacity = args
        .history_capacity
        .unwrap_or(defaults.engine.history_capacity);
    if history_capacity == 0 {
        anyhow::bail!("history_capacity must be greater than zero");
    }

    Ok(ServerConfig {
        host: args.host,
        port: args.port,
        redis_url: args
            .redis_url
            .clone()
            .or_else(|| env_value("AVIATOR_REDIS_URL"))
            .unwrap_or(defaults.redis_url),
        redis_prefix: args.redis_prefix.clone().unwrap_or(defaults.redis_prefix),
        events_channel: args
            .events_channel
            .clone()
            .unwrap_or(defaults.events_channel),
        ledger_path: args.ledger_path.clone().unwrap_or(defaults.ledger_path),
        balance_url: args
            .balance_url
            .clone()
            .or_else(|| env_value("AVIATOR_BALANCE_URL"))
            .unwrap_or(defaults.balance_url),
        engine: EngineConfig {
            phases,
            history_capacity,
            seed: args.seed,
            service_name: args
                .service_name
                .clone()
                .unwrap_or(defaults.engine.service_name),
        },
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    init_tracing()?;

    let config = build_config(&args)?;
    info!(
        redis_prefix = %config.redis_prefix,
        events_channel = %config.events_channel,
        ledger_path = %config.ledger_path.display(),
        balance_url = %config.balance_url,
        tick_ms = config.engine.phases.tick_ms,
        "configuration loaded"
    );

    let rounds = RedisRoundStore::new(&config.redis_url, config.redis_prefix.clone())
        .context("invalid redis url")?;
    let events = RedisFanout::new(&config.redis_url, config.events_channel.clone())
        .context("invalid redis url")?;
    let ledger = SqliteLedger::open(&config.ledger_path).context("open ledger")?;
    let balances = HttpBalanceClient::new(&config.balance_url)?;

    let aviator: Arc<Aviator<Production>> = Arc::new(Aviator::new(
        config.engine.clone(),
        rounds,
        ledger,
        balances,
        events,
    ));
    aviator
        .start_all()
        .await
        .context("start round engines")?;

    let api = Api::new(aviator.clone());
    let app = api.router();

    // Start server
    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    aviator.registry().stop_all().await;
    info!("round engines stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_engine_fields() {
        let args = Args::parse_from([
            "grandaviator-server",
            "--redis-url",
            "redis://cache:6379",
            "--tick-ms",
            "50",
            "--seed",
            "7",
            "--history-capacity",
            "5",
        ]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.engine.phases.tick_ms, 50);
        assert_eq!(config.engine.phases.countdown_ms, 14_000);
        assert_eq!(config.engine.seed, Some(7));
        assert_eq!(config.engine.history_capacity, 5);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn rejects_zero_tick() {
        let args = Args::parse_from(["grandaviator-server", "--tick-ms", "0"]);
        let err = build_config(&args).unwrap_err();
        assert!(err.to_string().contains("tick_ms"), "unexpected error: {err}");
    }

    #[test]
    fn rejects_zero_history_capacity() {
        let args = Args::parse_from(["grandaviator-server", "--history-capacity", "0"]);
        assert!(build_config(&args).is_err());
    }
}
