use crate::cache::MAX_TTL;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Webhook secret is not set")]
    MissingWebhookSecret,

    #[error("Campaign path is empty")]
    EmptyCampaignPath,

    #[error("Ranking TTL must be between one second and 30 days")]
    InvalidTtl,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    fn default_admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3001,
        }
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Where the campaign lives on the fundraising platform.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Raisely {
    #[serde(default = "Raisely::default_api_url")]
    pub api_url: Url,
    #[serde(default = "Raisely::default_communications_url")]
    pub communications_url: Url,
    /// Campaign path used in API routes, e.g. "chris-birthday-wish"
    pub campaign_path: String,
    /// Campaign uuid, used as the source of notification events
    pub campaign_uuid: String,
    /// API token for private fields, users and events. Usually supplied
    /// through the environment rather than the config file.
    #[serde(default)]
    pub token: String,
}

impl Raisely {
    fn default_api_url() -> Url {
        Url::parse("https://api.raisely.com/v3").expect("static URL is valid")
    }

    fn default_communications_url() -> Url {
        Url::parse("https://communications.raisely.com/v1").expect("static URL is valid")
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Ranking {
    /// How long a compiled ranking is served before the feed is read again.
    /// New donations invalidate it earlier through the webhook.
    #[serde(default = "Ranking::default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Ranking {
    fn default_ttl_secs() -> u64 {
        120 * 60
    }
}

impl Default for Ranking {
    fn default() -> Self {
        Ranking {
            ttl_secs: Ranking::default_ttl_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Webhook {
    /// Shared secret the platform sends in every webhook body
    #[serde(default)]
    pub secret: String,
    /// Minimum donation, in minor units, that may add a new costume option
    #[serde(default = "Webhook::default_costume_threshold")]
    pub costume_threshold: u64,
}

impl Webhook {
    fn default_costume_threshold() -> u64 {
        6000
    }
}

impl Default for Webhook {
    fn default() -> Self {
        Webhook {
            secret: String::new(),
            costume_threshold: Webhook::default_costume_threshold(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Notifications {
    #[serde(default = "Notifications::default_event_type")]
    pub event_type: String,
}

impl Notifications {
    fn default_event_type() -> String {
        "custom".into()
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Notifications {
            event_type: Notifications::default_event_type(),
        }
    }
}

/// A suggested costume item, pre-filled on the donation form until someone
/// proposes it. There are no built-in prompts; `rally/config.example.yaml`
/// lists the campaign's set.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CostumePrompt {
    pub description: String,
    pub photo_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "Listener::default_admin")]
    pub admin_listener: Listener,
    pub raisely: Raisely,
    #[serde(default)]
    pub ranking: Ranking,
    #[serde(default)]
    pub webhook: Webhook,
    #[serde(default)]
    pub notifications: Notifications,
    #[serde(default)]
    pub costume_prompts: Vec<CostumePrompt>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.webhook.secret.is_empty() {
            return Err(ValidationError::MissingWebhookSecret);
        }
        if self.raisely.campaign_path.trim().is_empty() {
            return Err(ValidationError::EmptyCampaignPath);
        }
        if self.ranking.ttl_secs == 0 || self.ranking.ttl_secs > MAX_TTL.as_secs() {
            return Err(ValidationError::InvalidTtl);
        }

        Ok(())
    }
}
