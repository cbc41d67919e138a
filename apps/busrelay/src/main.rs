//! busrelay - relays stream messages to one or more event buses.
//!
//! Messages are read as newline-delimited JSON from stdin, validated,
//! routed, signed with temporary credentials obtained through a
//! certificate-authenticated exchange, and delivered as `PutEvents` calls.
//! Each message's acknowledgment decision is logged.
//!
//! # Usage
//!
//! ```text
//! AWS1_HOST=events.eu-west-1.amazonaws.com AWS1_EXCHANGE_HOST=... busrelay < messages.ndjson
//! ```
//!
//! Each input line has the shape
//! `{"topic":"payments","partition":0,"offset":17,"payload":{...}}`. A string
//! payload is used verbatim; any other JSON value is re-serialized.
//!
//! See [`busrelay_core::RelayConfig::from_lookup`] for the environment
//! variables. `RUST_LOG` overrides `LOG_LEVEL` when set.

mod replay;

use std::sync::Arc;

use anyhow::{Context, Result};
use busrelay_core::{LogFormat, RelayConfig};
use busrelay_credentials::{CredentialManager, MemoryCacheStore, RolesAnywhereExchange};
use busrelay_dispatch::{
    DEFAULT_QUEUE_CAPACITY, Dispatcher, JsonTransformer, LoggingAckSink, PartitionRelay,
    ReqwestTransport, default_routing,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }

    Ok(())
}

/// Wire the dispatcher and its collaborators from `config`.
fn build_dispatcher(config: Arc<RelayConfig>) -> Result<Dispatcher> {
    let exchange = RolesAnywhereExchange::new(&config.credentials)
        .context("failed to build the credential exchange client")?;
    let credentials = CredentialManager::new(
        &config.destinations,
        config.credentials.clone(),
        Arc::new(MemoryCacheStore::new()),
        Arc::new(exchange),
    );
    let transport = ReqwestTransport::new(config.delivery.timeout)
        .context("failed to build the delivery client")?;
    let transformer = JsonTransformer::new(
        config.validation.routing_field.clone(),
        default_routing(&config.destinations),
    );

    Ok(Dispatcher::new(
        config,
        credentials,
        Arc::new(transport),
        Arc::new(transformer),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.log_level, config.log_format)?;

    let config = Arc::new(config);
    let dispatcher = build_dispatcher(Arc::clone(&config))?;
    let relay = PartitionRelay::new(
        Arc::new(dispatcher),
        Arc::new(LoggingAckSink),
        DEFAULT_QUEUE_CAPACITY,
    );

    info!(
        destinations = ?config.destinations.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        validation_field = %config.validation.field,
        version = VERSION,
        "starting busrelay",
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let processed = replay::run(stdin, relay).await?;
    info!(processed, "busrelay stopped");
    Ok(())
}
