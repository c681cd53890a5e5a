use crate::cache::{LoadResult, SingleFlightCache};
use crate::compiler::compile;
use crate::metrics_defs::RANKING_DONORS;
use crate::source::{DonationSource, SourceError};
use crate::types::RankingSnapshot;
use chrono::Utc;
use shared::gauge;
use std::sync::Arc;
use std::time::Duration;

/// Serves the compiled ranking, backed by the single-flight cache.
#[derive(Clone)]
pub struct RankingService {
    source: Arc<dyn DonationSource>,
    cache: SingleFlightCache,
}

impl RankingService {
    pub fn new(source: Arc<dyn DonationSource>, ttl: Duration) -> Self {
        RankingService {
            source,
            cache: SingleFlightCache::new(ttl),
        }
    }

    /// The cached ranking, loading it if it is missing or expired.
    pub async fn query(&self) -> LoadResult {
        self.cache.get(false, || load_snapshot(self.source.clone())).await
    }

    /// Drops the cached ranking and waits for a new one. If a load is already
    /// running, its result is used instead of starting another.
    pub async fn refresh(&self) -> LoadResult {
        self.cache.invalidate();
        self.cache.get(true, || load_snapshot(self.source.clone())).await
    }

    pub async fn query_with(&self, bust_cache: bool) -> LoadResult {
        if bust_cache {
            self.refresh().await
        } else {
            self.query().await
        }
    }

    pub fn is_ready(&self) -> bool {
        self.cache.is_warm()
    }
}

async fn load_snapshot(source: Arc<dyn DonationSource>) -> Result<RankingSnapshot, SourceError> {
    let (records, options) =
        tokio::try_join!(source.fetch_donations(), source.fetch_costume_options())?;
    tracing::info!(
        donations = records.len(),
        costume_options = options.len(),
        "compiling ranking"
    );
    let snapshot = compile(&records, &options, Utc::now());
    gauge!(RANKING_DONORS).set(snapshot.donors.len() as f64);
    Ok(snapshot)
}
