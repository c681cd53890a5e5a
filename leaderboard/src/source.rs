use crate::types::{CostumeOption, DonationRecord};
use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{0} cannot take path segments")]
    NotABase(String),
    #[error("{url} responded with {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// The campaign's donation feed.
#[async_trait]
pub trait DonationSource: Send + Sync {
    /// Every donation made to the campaign, across all pages.
    async fn fetch_donations(&self) -> Result<Vec<DonationRecord>, SourceError>;

    /// The options of the costume vote field. Empty if the field is missing.
    async fn fetch_costume_options(&self) -> Result<Vec<CostumeOption>, SourceError>;
}
