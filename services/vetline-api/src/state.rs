use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use vetline_core::config::RateLimitBackendKind;
use vetline_core::Config;
use vetline_dispatch::{
    DispatchEngine, DispatchSettings, DistanceEstimator, DistanceMatrixClient, DistanceProvider,
    LocationRelay,
};
use vetline_notify::{NotificationHub, RedisFanout};
use vetline_ratelimit::{Policies, RateLimitBackend, RateLimiter, RedisBackend};
use vetline_store::{DistressStore, SqliteStore};

pub struct AppState {
    pub config: Config,
    pub engine: DispatchEngine,
    pub relay: LocationRelay,
    pub limiter: Arc<RateLimiter>,
    pub hub: Arc<NotificationHub>,
}

impl AppState {
    /// Wire every component from configuration, connecting to Redis when configured.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(Path::new(&config.store.database_path), config.timeouts.store())
            .with_context(|| format!("opening store at {}", config.store.database_path))?;

        let hub = match &config.notify.redis_url {
            Some(url) => {
                let fanout = RedisFanout::connect(
                    url,
                    config.notify.fanout_channel.clone(),
                    Duration::from_secs(config.notify.presence_ttl_secs),
                )
                .await
                .context("connecting notification fan-out")?;
                Arc::new(NotificationHub::with_fanout(
                    config.notify.channel_capacity,
                    Arc::new(fanout),
                ))
            }
            None => Arc::new(NotificationHub::new(config.notify.channel_capacity)),
        };

        let policies = Policies::from_config(&config.rate_limit);
        let limiter = match (config.rate_limit.backend, &config.notify.redis_url) {
            (RateLimitBackendKind::Redis, Some(url)) => {
                let backend: Arc<dyn RateLimitBackend> = Arc::new(
                    RedisBackend::connect(url)
                        .await
                        .context("connecting rate-limit backend")?,
                );
                RateLimiter::new(backend, policies)
            }
            (RateLimitBackendKind::Redis, None) => {
                warn!("Redis rate limiting requested without notify.redis_url, using memory");
                RateLimiter::in_memory(policies)
            }
            (RateLimitBackendKind::Memory, _) => RateLimiter::in_memory(policies),
        };

        let provider: Option<Arc<dyn DistanceProvider>> = config.maps.api_key.as_ref().map(|key| {
            Arc::new(DistanceMatrixClient::new(
                key.clone(),
                config.maps.distance_matrix_url.clone(),
            )) as Arc<dyn DistanceProvider>
        });
        if provider.is_none() {
            info!("No maps API key configured, travel estimates use haversine");
        }
        let distance = DistanceEstimator::new(
            provider,
            config.timeouts.distance(),
            config.dispatch.eta_minutes_per_km,
        );

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            hub,
            Arc::new(limiter),
            distance,
        ))
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn DistressStore>,
        hub: Arc<NotificationHub>,
        limiter: Arc<RateLimiter>,
        distance: DistanceEstimator,
    ) -> Self {
        let settings = DispatchSettings::from_config(&config);
        let relay = LocationRelay::new(Arc::clone(&store), Arc::clone(&hub), &settings);
        let engine = DispatchEngine::new(store, Arc::clone(&hub), distance, settings);
        Self {
            config,
            engine,
            relay,
            limiter,
            hub,
        }
    }
}
