use crate::costume::{CostumeRegistry, RegistryError};
use crate::notify::{DonorContact, DonorDirectory, Messenger, NotificationEvent, NotifyError};
use crate::source::{DonationSource, SourceError};
use crate::types::{
    CostumeOption, Donation, DonationRecord, PublicFields, RankedDonor, RankingSnapshot, UserRef,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub fn record(
    uuid: &str,
    name: &str,
    amount: u64,
    vote: Option<&str>,
    clothing: Option<&str>,
    photo: Option<&str>,
) -> DonationRecord {
    let public = (vote.is_some() || clothing.is_some() || photo.is_some()).then(|| PublicFields {
        costume_vote: vote.map(String::from),
        clothing: clothing.map(String::from),
        picture_of_costume_item: photo.map(String::from),
    });

    DonationRecord {
        user: Some(UserRef {
            uuid: Some(uuid.to_string()),
        }),
        preferred_name: Some(name.to_string()),
        email: None,
        full_name: None,
        amount,
        public,
    }
}

pub fn donation(donor_id: &str, name: &str, amount: u64) -> Donation {
    Donation::from_record(&record(donor_id, name, amount, None, None, None))
        .expect("record has a donor id")
}

/// A snapshot whose donors appear in the given order.
pub fn ranked(donors: &[(&str, &str, u64)]) -> RankingSnapshot {
    RankingSnapshot {
        donors: donors
            .iter()
            .enumerate()
            .map(|(i, (id, name, total))| RankedDonor {
                donor_id: id.to_string(),
                preferred_name: name.to_string(),
                total: *total,
                count: 1,
                position: i + 1,
            })
            .collect(),
        costume_votes: Vec::new(),
        computed_at: Utc::now(),
    }
}

pub fn snapshot_with_totals(totals: &[u64]) -> RankingSnapshot {
    let ids: Vec<String> = (0..totals.len()).map(|i| format!("donor{i}")).collect();
    let donors: Vec<(&str, &str, u64)> = ids
        .iter()
        .zip(totals)
        .map(|(id, total)| (id.as_str(), id.as_str(), *total))
        .collect();
    ranked(&donors)
}

fn not_found(url: &str) -> SourceError {
    SourceError::Status {
        url: url.to_string(),
        status: StatusCode::NOT_FOUND,
    }
}

/// In-memory donation feed.
pub struct FakeSource {
    records: Mutex<Vec<DonationRecord>>,
    options: Vec<CostumeOption>,
    fetches: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeSource {
    pub fn new(records: Vec<DonationRecord>, options: Vec<CostumeOption>) -> Self {
        FakeSource {
            records: Mutex::new(records),
            options,
            fetches: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn push(&self, record: DonationRecord) {
        self.records.lock().push(record);
    }

    pub fn donation_fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Makes the next donation fetch fail with a 502.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DonationSource for FakeSource {
    async fn fetch_donations(&self) -> Result<Vec<DonationRecord>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SourceError::Status {
                url: "http://feed.test/donations".into(),
                status: StatusCode::BAD_GATEWAY,
            });
        }
        Ok(self.records.lock().clone())
    }

    async fn fetch_costume_options(&self) -> Result<Vec<CostumeOption>, SourceError> {
        Ok(self.options.clone())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    ids: Mutex<HashSet<String>>,
    failing: bool,
}

impl FakeRegistry {
    pub fn failing() -> Self {
        FakeRegistry {
            failing: true,
            ..Default::default()
        }
    }

    pub fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.lock().iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CostumeRegistry for FakeRegistry {
    async fn register(&self, option: CostumeOption) -> Result<bool, RegistryError> {
        if self.failing {
            return Err(RegistryError::Source(SourceError::Status {
                url: "http://platform.test/fields".into(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
            }));
        }
        Ok(self.ids.lock().insert(option.id))
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    contacts: HashMap<String, DonorContact>,
}

impl FakeDirectory {
    pub fn with(mut self, donor_id: &str, contact: DonorContact) -> Self {
        self.contacts.insert(donor_id.to_string(), contact);
        self
    }
}

#[async_trait]
impl DonorDirectory for FakeDirectory {
    async fn lookup(&self, donor_id: &str) -> Result<DonorContact, NotifyError> {
        self.contacts
            .get(donor_id)
            .cloned()
            .ok_or_else(|| NotifyError::Lookup {
                donor_id: donor_id.to_string(),
                source: not_found("http://platform.test/users"),
            })
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    events: Mutex<Vec<NotificationEvent>>,
    fail_for: Option<String>,
}

impl RecordingMessenger {
    pub fn failing_for(donor_id: &str) -> Self {
        RecordingMessenger {
            fail_for: Some(donor_id.to_string()),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        if self.fail_for.as_deref() == Some(event.data.recipient.uuid.as_str()) {
            return Err(NotifyError::Delivery(not_found("http://comms.test/events")));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}
