use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing::info;
use vetline_api::{router, AppState, WsServer};
use vetline_core::{logging, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_config_path(&args)?;
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;
    logging::init_with_format(config.log_format);

    let bind_addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let ws_addr = format!("{}:{}", config.server.bind_addr, config.server.ws_port);
    let sweep_every = Duration::from_secs(config.rate_limit.sweep_interval_secs);

    let state = Arc::new(AppState::new(config).await?);
    state.engine.warm_index().await.context("warming responder index")?;

    state.limiter.spawn_sweeper(sweep_every);
    if let Some(fanout) = state.hub.fanout() {
        fanout.spawn_subscriber(Arc::clone(&state.hub));
    }
    state.hub.spawn_presence_refresher();

    let ws_listener = TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("binding WebSocket listener on {}", ws_addr))?;
    let ws_server = Arc::new(WsServer::new(Arc::clone(&state)));
    tokio::spawn(ws_server.run(ws_listener));

    let app = router(state);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding HTTP listener on {}", bind_addr))?;
    info!(addr = %bind_addr, "Vetline API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Vetline API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn parse_config_path(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            match args_iter.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config was provided without a path"),
            }
        }
    }
    Ok(None)
}
