use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use switchboard::config::SwitchboardConfig;
use switchboard::engine::events::{EventContainer, EventKind, GatewayEvent};
use switchboard::engine::tasks::BackgroundTasks;
use switchboard::errors::{ErrorNotice, ErrorReporter};
use switchboard::routing::dispatcher::Dispatcher;
use switchboard::routing::rules::{Destination, RoutingTable};
use switchboard::state::SharedState;
use switchboard::state::bans::RestBans;
use switchboard::state::keys::KeyCodec;
use switchboard::state::redis::RedisStore;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared guild state cache and event router.
#[derive(Parser)]
#[command(name = "switchboard", version)]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "switchboard.toml")]
    config: String,

    /// Consumer name used in deduplication keys.
    #[arg(long, default_value = "gateway")]
    source: String,
}

/// One line of output per routed event.
#[derive(Serialize)]
struct Routed<'a> {
    key: &'a str,
    kind: EventKind,
    destinations: &'a [Destination],
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = SwitchboardConfig::load(&args.config)?;

    let store = RedisStore::connect(&config.redis.url).context("failed to create redis pool")?;
    let tasks = BackgroundTasks::new();
    let mut state = SharedState::new(Arc::new(store), KeyCodec::new(&config.redis.namespace))
        .with_background_tasks(tasks.clone())
        .with_max_channel_messages(config.state.max_channel_messages)
        .with_expiry(config.state.expire());
    if config.upstream.token.is_empty() {
        warn!("no upstream token configured, ban lists will not be backfilled");
    } else {
        state = state.with_upstream_bans(Arc::new(RestBans::new(
            &config.upstream.api_base,
            &config.upstream.token,
        )));
    }

    let table = if Path::new(&config.routing.path).exists() {
        RoutingTable::load(&config.routing.path)
            .with_context(|| format!("failed to load routing from {}", config.routing.path))?
    } else {
        warn!(path = %config.routing.path, "no routing file found, routing nothing");
        RoutingTable::compile(Vec::new())
    };
    info!(rules = table.len(), "routing table loaded");
    let dispatcher = Dispatcher::new(table, state.clone());

    let (notice_tx, mut notice_rx) = mpsc::channel::<ErrorNotice>(64);
    let reporter = ErrorReporter::new(
        config.errors.global_per_second,
        config.errors.channel_per_second,
    )
    .with_notices(notice_tx);
    tasks.spawn(|cancel| async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                notice = notice_rx.recv() => match notice {
                    Some(notice) => info!(channel_id = %notice.channel_id, content = %notice.content, "error notice"),
                    None => break,
                },
            }
        }
    });

    info!(source = %args.source, namespace = %config.redis.namespace, "Switchboard reading gateway events from stdin");

    let gateway_started = Utc::now();
    let mut bot_user_id = String::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            info!("end of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: GatewayEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping malformed gateway event");
                continue;
            }
        };
        if let GatewayEvent::Ready(ready) = &event {
            bot_user_id = ready.user.id.clone();
        }

        let key = match state.event_key(&event, &args.source) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "failed to compute event key");
                continue;
            }
        };
        if !state.is_new_event(&key).await {
            debug!(%key, "duplicate event dropped");
            continue;
        }

        let applied = state.apply(&bot_user_id, &event).await;
        let container = EventContainer::new(
            event,
            key,
            bot_user_id.as_str(),
            gateway_started,
            &config.prefix,
        );
        let destinations = dispatcher.destinations(&container).await;

        if let Err(e) = applied {
            let mut handlers = Vec::new();
            for handler in destinations.iter().flat_map(|d| d.error_handlers.iter()) {
                if !handlers.contains(handler) {
                    handlers.push(*handler);
                }
            }
            let err = anyhow::Error::new(e).context(format!("applying {}", container.kind));
            reporter.report("state", &err, &handlers, Some(&container)).await;
        }

        if destinations.is_empty() {
            continue;
        }
        let routed = Routed {
            key: &container.key,
            kind: container.kind,
            destinations: &destinations,
        };
        println!("{}", serde_json::to_string(&routed)?);
    }

    tasks.shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(())
}
