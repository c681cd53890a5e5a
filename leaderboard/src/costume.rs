//! Registering costumes proposed by donors as new vote options.

use crate::compiler::normalize_costume_id;
use crate::source::SourceError;
use crate::types::{CostumeOption, Donation};
use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("{0}")]
    Source(#[from] SourceError),
    #[error("campaign has no `{0}` field")]
    MissingField(&'static str),
}

#[async_trait]
pub trait CostumeRegistry: Send + Sync {
    /// Adds `option` to the costume vote field. Returns false, without
    /// changing anything, when an option with the same id already exists.
    async fn register(&self, option: CostumeOption) -> Result<bool, RegistryError>;
}

/// The option a donation proposes, if it proposes one and gave at least
/// `threshold` minor units.
pub fn proposed_option(donation: &Donation, threshold: u64) -> Option<CostumeOption> {
    if donation.amount < threshold {
        return None;
    }

    let (label, photo_url) = donation.costume.proposal()?;
    let id = normalize_costume_id(label);
    if id.is_empty() {
        return None;
    }

    Some(CostumeOption::new(id, label, photo_url.map(String::from)))
}
