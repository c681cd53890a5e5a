//! Lead notifications.
//!
//! The new leader gets a "lead-gained" event and every runner-up sharing the
//! second place total gets a "lead-lost" event. The public ranking does not
//! carry emails, so runners-up are looked up in the donor directory first.
//! Each recipient is handled by its own task; one failure does not stop or
//! undo the others, and nothing is retried.

use crate::lead_change::LeadChange;
use crate::metrics_defs::NOTIFICATION_SENT;
use crate::source::SourceError;
use crate::types::{Donation, DonorId, RankedDonor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::counter;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("could not look up donor {donor_id}: {source}")]
    Lookup {
        donor_id: DonorId,
        #[source]
        source: SourceError,
    },
    #[error("could not deliver event: {0}")]
    Delivery(#[source] SourceError),
    #[error("notification task failed: {0}")]
    Task(String),
}

/// Private contact details of a donor.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DonorContact {
    pub email: Option<String>,
    pub preferred_name: Option<String>,
    pub full_name: Option<String>,
}

#[async_trait]
pub trait DonorDirectory: Send + Sync {
    async fn lookup(&self, donor_id: &str) -> Result<DonorContact, NotifyError>;
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    LeadGained,
    LeadLost,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::LeadGained => "lead-gained",
            MessageType::LeadLost => "lead-lost",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub uuid: DonorId,
    pub preferred_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub total: u64,
}

impl Recipient {
    fn leader(donation: &Donation, leader: &RankedDonor) -> Self {
        Recipient {
            uuid: donation.donor_id.clone(),
            preferred_name: donation.preferred_name.clone(),
            email: donation.email.clone(),
            full_name: donation.full_name.clone(),
            total: leader.total,
        }
    }

    fn runner_up(donor: &RankedDonor, contact: DonorContact) -> Self {
        Recipient {
            uuid: donor.donor_id.clone(),
            preferred_name: contact
                .preferred_name
                .unwrap_or_else(|| donor.preferred_name.clone()),
            email: contact.email,
            full_name: contact.full_name,
            total: donor.total,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadMessage {
    #[serde(flatten)]
    pub recipient: Recipient,
    pub amount_to_lead: f64,
    pub message_type: MessageType,
}

/// A custom event for the messaging provider, which turns it into an email.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub version: u32,
    pub data: LeadMessage,
}

/// Result of one recipient's notification.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub donor_id: DonorId,
    pub message_type: MessageType,
    pub result: Result<(), NotifyError>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    directory: Arc<dyn DonorDirectory>,
    messenger: Arc<dyn Messenger>,
    event_type: String,
    source: String,
}

impl NotificationDispatcher {
    pub fn new(
        directory: Arc<dyn DonorDirectory>,
        messenger: Arc<dyn Messenger>,
        event_type: impl Into<String>,
        campaign_uuid: &str,
    ) -> Self {
        NotificationDispatcher {
            directory,
            messenger,
            event_type: event_type.into(),
            source: format!("campaign:{campaign_uuid}"),
        }
    }

    fn event(&self, recipient: Recipient, amount_to_lead: f64, message_type: MessageType) -> NotificationEvent {
        NotificationEvent {
            event_type: self.event_type.clone(),
            source: self.source.clone(),
            created_at: Utc::now(),
            version: 1,
            data: LeadMessage {
                recipient,
                amount_to_lead,
                message_type,
            },
        }
    }

    /// Notifies the new leader and every runner-up, and waits for all of
    /// them. Failures are logged and reported, never returned.
    pub async fn dispatch(&self, donation: &Donation, change: &LeadChange) -> DispatchReport {
        let mut tasks = JoinSet::new();

        let event = self.event(
            Recipient::leader(donation, &change.leader),
            change.amount_to_lead,
            MessageType::LeadGained,
        );
        let messenger = self.messenger.clone();
        let donor_id = donation.donor_id.clone();
        tasks.spawn(async move {
            let result = messenger.send(&event).await;
            (donor_id, MessageType::LeadGained, result)
        });

        for donor in change.tied_second.iter().cloned() {
            let this = self.clone();
            let amount_to_lead = change.amount_to_lead;
            tasks.spawn(async move {
                let result = match this.directory.lookup(&donor.donor_id).await {
                    Ok(contact) => {
                        let event = this.event(
                            Recipient::runner_up(&donor, contact),
                            amount_to_lead,
                            MessageType::LeadLost,
                        );
                        this.messenger.send(&event).await
                    }
                    Err(e) => Err(e),
                };
                (donor.donor_id, MessageType::LeadLost, result)
            });
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (donor_id, message_type, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "notification task panicked");
                    counter!(NOTIFICATION_SENT, "message_type" => "unknown", "status" => "error")
                        .increment(1);
                    report.outcomes.push(DispatchOutcome {
                        donor_id: String::new(),
                        message_type: MessageType::LeadLost,
                        result: Err(NotifyError::Task(e.to_string())),
                    });
                    continue;
                }
            };

            match &result {
                Ok(()) => {
                    tracing::info!(donor_id = %donor_id, message_type = message_type.as_str(), "notification sent");
                    counter!(NOTIFICATION_SENT, "message_type" => message_type.as_str(), "status" => "ok")
                        .increment(1);
                }
                Err(e) => {
                    tracing::error!(donor_id = %donor_id, message_type = message_type.as_str(), error = %e, "notification failed");
                    counter!(NOTIFICATION_SENT, "message_type" => message_type.as_str(), "status" => "error")
                        .increment(1);
                }
            }

            report.outcomes.push(DispatchOutcome {
                donor_id,
                message_type,
                result,
            });
        }

        report
    }
}
