//! Donation records as they arrive from upstream, and the ranking types
//! compiled from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DonorId = String;

/// A donation in the shape the campaign platform sends it, both in the
/// donation feed and inside webhook events. Only the fields we read are
/// modelled; everything else is ignored.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DonationRecord {
    pub user: Option<UserRef>,
    pub preferred_name: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[serde(default)]
    pub amount: u64,
    pub public: Option<PublicFields>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct UserRef {
    pub uuid: Option<String>,
}

/// Custom fields the donation form stores publicly.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicFields {
    pub costume_vote: Option<String>,
    /// Free text description of a newly proposed costume item.
    pub clothing: Option<String>,
    pub picture_of_costume_item: Option<String>,
}

/// What a donation says about the costume vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CostumeChoice {
    None,
    Existing {
        id: String,
    },
    Proposed {
        label: String,
        photo_url: Option<String>,
    },
    /// The form allows picking an option and proposing a new one at once;
    /// both count as a vote.
    ExistingAndProposed {
        id: String,
        label: String,
        photo_url: Option<String>,
    },
}

impl CostumeChoice {
    pub fn existing_id(&self) -> Option<&str> {
        match self {
            CostumeChoice::Existing { id } | CostumeChoice::ExistingAndProposed { id, .. } => {
                Some(id.as_str())
            }
            _ => None,
        }
    }

    /// The proposed label and its photo, if the donor suggested a new costume.
    pub fn proposal(&self) -> Option<(&str, Option<&str>)> {
        match self {
            CostumeChoice::Proposed { label, photo_url }
            | CostumeChoice::ExistingAndProposed {
                label, photo_url, ..
            } => Some((label.as_str(), photo_url.as_deref())),
            _ => None,
        }
    }
}

/// A validated donation: it always belongs to a donor.
#[derive(Clone, Debug, PartialEq)]
pub struct Donation {
    pub donor_id: DonorId,
    pub preferred_name: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    /// Minor units of whatever currency the donor paid in. Amounts are not
    /// normalized across currencies.
    pub amount: u64,
    pub costume: CostumeChoice,
}

impl Donation {
    /// Returns `None` when the record has no donor id.
    pub fn from_record(record: &DonationRecord) -> Option<Self> {
        let donor_id = non_empty(record.user.as_ref().and_then(|u| u.uuid.as_deref()))?;

        let public = record.public.as_ref();
        let vote = non_empty(public.and_then(|p| p.costume_vote.as_deref()));
        let label = non_empty(public.and_then(|p| p.clothing.as_deref()));
        let photo_url = non_empty(public.and_then(|p| p.picture_of_costume_item.as_deref()));

        let costume = match (vote, label) {
            (None, None) => CostumeChoice::None,
            (Some(id), None) => CostumeChoice::Existing { id },
            (None, Some(label)) => CostumeChoice::Proposed { label, photo_url },
            (Some(id), Some(label)) => CostumeChoice::ExistingAndProposed {
                id,
                label,
                photo_url,
            },
        };

        Some(Donation {
            donor_id,
            preferred_name: record.preferred_name.clone().unwrap_or_default(),
            email: record.email.clone(),
            full_name: record.full_name.clone(),
            amount: record.amount,
            costume,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(String::from)
}

/// All donations of one donor, summed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDonor {
    #[serde(rename = "uuid")]
    pub donor_id: DonorId,
    pub preferred_name: String,
    pub total: u64,
    pub count: u32,
    /// 1-based position after sorting by total.
    pub position: usize,
}

/// A selectable costume item from the campaign's vote field.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostumeOption {
    #[serde(rename = "value")]
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Fields the platform attaches that we pass back untouched on update.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CostumeOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>, photo_url: Option<String>) -> Self {
        CostumeOption {
            id: id.into(),
            label: label.into(),
            photo_url,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostumeVote {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub total: u32,
    /// Dense rank, starting at 1.
    pub rank: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSnapshot {
    pub donors: Vec<RankedDonor>,
    pub costume_votes: Vec<CostumeVote>,
    pub computed_at: DateTime<Utc>,
}

impl RankingSnapshot {
    pub fn leader(&self) -> Option<&RankedDonor> {
        self.donors.first()
    }

    pub fn runner_up(&self) -> Option<&RankedDonor> {
        self.donors.get(1)
    }
}
