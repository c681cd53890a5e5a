pub mod api;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod costume;
pub mod lead_change;
pub mod metrics_defs;
pub mod notify;
pub mod raisely;
pub mod service;
pub mod source;
pub mod types;
pub mod webhook;

#[cfg(test)]
mod testutils;

use api::{AppState, ServeError};
use cache::CacheError;
use config::Config;
use notify::NotificationDispatcher;
use raisely::RaiselyClient;
use service::RankingService;
use shared::admin_service::AdminService;
use std::sync::Arc;
use std::time::Duration;
use types::RankingSnapshot;
use webhook::DonationWebhook;

#[derive(thiserror::Error, Debug)]
pub enum LeaderboardError {
    #[error("API server failed: {0}")]
    Serve(#[from] ServeError),
    #[error("admin listener failed: {0}")]
    Admin(#[source] std::io::Error),
}

fn ranking_service(config: &Config, client: Arc<RaiselyClient>) -> RankingService {
    RankingService::new(client, Duration::from_secs(config.ranking.ttl_secs))
}

/// Serves the ranking API and the admin probes until either listener fails.
pub async fn run(config: Config) -> Result<(), LeaderboardError> {
    let client = Arc::new(RaiselyClient::new(
        config.raisely.clone(),
        config.costume_prompts.clone(),
    ));
    let ranking = ranking_service(&config, client.clone());
    let notifier = NotificationDispatcher::new(
        client.clone(),
        client.clone(),
        config.notifications.event_type.clone(),
        &config.raisely.campaign_uuid,
    );
    let webhook = DonationWebhook::new(
        config.webhook.secret.clone(),
        config.webhook.costume_threshold,
        ranking.clone(),
        client,
        notifier,
    );

    // Warm the cache so the first visitor does not wait for the feed.
    let warm = ranking.clone();
    tokio::spawn(async move {
        match warm.query().await {
            Ok(snapshot) => tracing::info!(donors = snapshot.donors.len(), "ranking warmed up"),
            Err(e) => tracing::warn!(error = %e, "initial ranking load failed"),
        }
    });

    let ready = ranking.clone();
    let admin = AdminService::new(move || ready.is_ready());
    let admin_listener = config.admin_listener.clone();

    let state = AppState {
        ranking,
        webhook: Arc::new(webhook),
    };

    tokio::try_join!(
        async {
            api::serve(config.listener.clone(), state)
                .await
                .map_err(LeaderboardError::from)
        },
        async {
            shared::http::run_http_service(&admin_listener.host, admin_listener.port, admin)
                .await
                .map_err(LeaderboardError::Admin)
        },
    )?;

    Ok(())
}

/// Compiles the ranking once, straight from the donation feed.
pub async fn current_ranking(config: &Config) -> Result<Arc<RankingSnapshot>, CacheError> {
    let client = Arc::new(RaiselyClient::new(
        config.raisely.clone(),
        config.costume_prompts.clone(),
    ));
    ranking_service(config, client).query().await
}
