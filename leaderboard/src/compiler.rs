//! Turns the raw donation feed into donor and costume rankings.
//!
//! Everything in here is pure: the same records and options always produce
//! the same snapshot.

use crate::types::{
    CostumeOption, CostumeVote, Donation, DonationRecord, DonorId, RankedDonor, RankingSnapshot,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Compiles donor totals and costume votes.
///
/// Records without a donor id are skipped with a warning rather than failing
/// the whole compile.
pub fn compile(
    records: &[DonationRecord],
    options: &[CostumeOption],
    computed_at: DateTime<Utc>,
) -> RankingSnapshot {
    let donations: Vec<Donation> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let donation = Donation::from_record(record);
            if donation.is_none() {
                tracing::warn!(index, "skipping donation record without a donor id");
            }
            donation
        })
        .collect();

    RankingSnapshot {
        donors: rank_donors(&donations),
        costume_votes: tally_costume_votes(&donations, options),
        computed_at,
    }
}

/// Sums donations per donor and orders donors by total, highest first.
/// Donors with equal totals keep the order in which they first donated.
pub fn rank_donors(donations: &[Donation]) -> Vec<RankedDonor> {
    let mut index: HashMap<&DonorId, usize> = HashMap::new();
    let mut donors: Vec<RankedDonor> = Vec::new();

    for donation in donations {
        let slot = *index.entry(&donation.donor_id).or_insert_with(|| {
            donors.push(RankedDonor {
                donor_id: donation.donor_id.clone(),
                preferred_name: String::new(),
                total: 0,
                count: 0,
                position: 0,
            });
            donors.len() - 1
        });

        let donor = &mut donors[slot];
        // Feed order is taken as chronological, so the latest name wins.
        // A donation without a name keeps the one already known.
        if !donation.preferred_name.is_empty() {
            donor.preferred_name = donation.preferred_name.clone();
        }
        donor.total += donation.amount;
        donor.count += 1;
    }

    // sort_by is stable
    donors.sort_by(|a, b| b.total.cmp(&a.total));
    for (i, donor) in donors.iter_mut().enumerate() {
        donor.position = i + 1;
    }

    donors
}

/// Counts one vote per chosen option and one per proposed costume. Every
/// seeded option is listed, even without votes.
pub fn tally_costume_votes(donations: &[Donation], options: &[CostumeOption]) -> Vec<CostumeVote> {
    let mut tally = Tally::default();

    for option in options {
        tally.seed(&option.id, &option.label, option.photo_url.as_deref());
    }

    for donation in donations {
        if let Some(id) = donation.costume.existing_id() {
            tally.vote(id, None, None);
        }
        if let Some((label, photo_url)) = donation.costume.proposal() {
            let id = normalize_costume_id(label);
            if id.is_empty() {
                tracing::warn!(label, "ignoring costume proposal without usable characters");
                continue;
            }
            tally.vote(&id, Some(label), photo_url);
        }
    }

    let mut votes = tally.votes;
    votes.sort_by(|a, b| b.total.cmp(&a.total));
    assign_dense_ranks(&mut votes);
    votes
}

#[derive(Default)]
struct Tally {
    index: HashMap<String, usize>,
    votes: Vec<CostumeVote>,
}

impl Tally {
    fn entry(&mut self, id: &str, name: Option<&str>, photo_url: Option<&str>) -> &mut CostumeVote {
        let slot = match self.index.get(id) {
            Some(slot) => *slot,
            None => {
                self.votes.push(CostumeVote {
                    id: id.to_string(),
                    name: name.map_or_else(|| start_case(id), String::from),
                    photo_url: photo_url.map(String::from),
                    total: 0,
                    rank: 0,
                });
                self.index.insert(id.to_string(), self.votes.len() - 1);
                self.votes.len() - 1
            }
        };
        &mut self.votes[slot]
    }

    fn seed(&mut self, id: &str, name: &str, photo_url: Option<&str>) {
        self.entry(id, Some(name), photo_url);
    }

    fn vote(&mut self, id: &str, name: Option<&str>, photo_url: Option<&str>) {
        self.entry(id, name, photo_url).total += 1;
    }
}

/// Dense ranking over votes already sorted by total, highest first: ties
/// share a rank and the next distinct total gets the next rank.
pub fn assign_dense_ranks(votes: &mut [CostumeVote]) {
    let mut rank = 0;
    let mut last_total = None;
    for vote in votes.iter_mut() {
        if last_total != Some(vote.total) {
            rank += 1;
            last_total = Some(vote.total);
        }
        vote.rank = rank;
    }
}

/// Derives an option id from a free text costume label, e.g.
/// `"Cowboy  Hat!"` becomes `"cowboy-hat"`.
pub fn normalize_costume_id(label: &str) -> String {
    let mut id = String::with_capacity(label.len());
    let mut pending_dash = false;

    for c in label.trim().chars() {
        if c.is_whitespace() || c == '-' {
            pending_dash = true;
        } else if c.is_ascii_alphanumeric() {
            if pending_dash && !id.is_empty() {
                id.push('-');
            }
            pending_dash = false;
            id.push(c.to_ascii_lowercase());
        }
    }

    id
}

/// `"cowboy-hat"` -> `"Cowboy Hat"`
fn start_case(id: &str) -> String {
    id.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
