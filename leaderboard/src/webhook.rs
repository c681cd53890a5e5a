//! Handling of "donation succeeded" webhooks.
//!
//! An authorized event refreshes the ranking and, for large enough donations
//! proposing a new costume, registers it as a vote option. The two run
//! concurrently. When the donor has just taken first place, the new leader
//! and the runners-up are notified before the response is sent.

use crate::cache::CacheError;
use crate::costume::{CostumeRegistry, RegistryError, proposed_option};
use crate::lead_change::detect;
use crate::metrics_defs::{LEAD_CHANGED, WEBHOOK_RECEIVED};
use crate::notify::NotificationDispatcher;
use crate::service::RankingService;
use crate::types::{Donation, DonationRecord};
use serde::{Deserialize, Serialize};
use shared::counter;
use std::sync::Arc;
use subtle::ConstantTimeEq;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookBody {
    pub secret: Option<String>,
    pub data: Option<WebhookEvent>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookEvent {
    pub data: Option<DonationRecord>,
}

impl WebhookBody {
    /// Reads a raw request body. The secret is taken on its own so that a
    /// request with a malformed donation still goes through the secret
    /// check; an unreadable event is then reported as an invalid event.
    pub fn parse(raw: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) else {
            return WebhookBody::default();
        };

        let secret = value
            .get("secret")
            .and_then(|s| s.as_str())
            .map(String::from);
        let data = value
            .get("data")
            .and_then(|d| WebhookEvent::deserialize(d).ok());

        WebhookBody { secret, data }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSummary {
    pub added_clothing: bool,
    pub ranking_changed: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("Unauthorized request")]
    Unauthorized,
    #[error("Webhook event carries no donation from a known donor")]
    InvalidEvent,
    #[error("{0}")]
    Ranking(#[from] CacheError),
    #[error("{0}")]
    Registry(#[from] RegistryError),
}

impl WebhookError {
    pub fn status(&self) -> u16 {
        match self {
            WebhookError::Unauthorized => 403,
            WebhookError::InvalidEvent => 400,
            WebhookError::Ranking(_) | WebhookError::Registry(_) => 500,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            WebhookError::Unauthorized => "unauthorized",
            WebhookError::InvalidEvent => "invalid",
            WebhookError::Ranking(_) | WebhookError::Registry(_) => "error",
        }
    }
}

pub struct DonationWebhook {
    secret: String,
    costume_threshold: u64,
    ranking: RankingService,
    registry: Arc<dyn CostumeRegistry>,
    notifier: NotificationDispatcher,
}

impl DonationWebhook {
    pub fn new(
        secret: impl Into<String>,
        costume_threshold: u64,
        ranking: RankingService,
        registry: Arc<dyn CostumeRegistry>,
        notifier: NotificationDispatcher,
    ) -> Self {
        DonationWebhook {
            secret: secret.into(),
            costume_threshold,
            ranking,
            registry,
            notifier,
        }
    }

    fn authorize(&self, body: &WebhookBody) -> Result<(), WebhookError> {
        let given = body.secret.as_deref().unwrap_or_default();
        if self.secret.is_empty() || !bool::from(given.as_bytes().ct_eq(self.secret.as_bytes())) {
            return Err(WebhookError::Unauthorized);
        }
        Ok(())
    }

    pub async fn handle(&self, body: WebhookBody) -> Result<WebhookSummary, WebhookError> {
        let result = self.process(body).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        counter!(WEBHOOK_RECEIVED, "outcome" => outcome).increment(1);
        result
    }

    async fn process(&self, body: WebhookBody) -> Result<WebhookSummary, WebhookError> {
        if let Err(e) = self.authorize(&body) {
            tracing::warn!("rejected webhook with a missing or wrong secret");
            return Err(e);
        }

        let donation = body
            .data
            .and_then(|event| event.data)
            .as_ref()
            .and_then(Donation::from_record)
            .ok_or(WebhookError::InvalidEvent)?;

        tracing::info!(
            donor_id = %donation.donor_id,
            amount = donation.amount,
            "donation received"
        );

        let proposal = proposed_option(&donation, self.costume_threshold);
        let register = async {
            match proposal {
                Some(option) => self.registry.register(option).await,
                None => Ok(false),
            }
        };

        // Both are allowed to finish; whatever one of them committed stays
        // even when the other fails.
        let (snapshot, added_clothing) = tokio::join!(self.ranking.refresh(), register);
        let snapshot = snapshot.inspect_err(|e| {
            tracing::error!(error = %e, "could not refresh ranking after donation");
        })?;
        let added_clothing = added_clothing.inspect_err(|e| {
            tracing::error!(error = %e, "could not register proposed costume");
        })?;

        let ranking_changed = match detect(&donation, &snapshot) {
            Some(change) => {
                tracing::info!(
                    donor_id = %donation.donor_id,
                    gap = change.gap,
                    runners_up = change.tied_second.len(),
                    "lead changed"
                );
                counter!(LEAD_CHANGED).increment(1);
                let report = self.notifier.dispatch(&donation, &change).await;
                if report.failed() > 0 {
                    tracing::warn!(
                        delivered = report.delivered(),
                        failed = report.failed(),
                        "some lead notifications were not sent"
                    );
                }
                true
            }
            None => false,
        };

        Ok(WebhookSummary {
            added_clothing,
            ranking_changed,
        })
    }
}
