//! Deciding whether a donation put its donor in the lead.

use crate::types::{Donation, RankedDonor, RankingSnapshot};

#[derive(Clone, Debug, PartialEq)]
pub struct LeadChange {
    /// The donor of the triggering donation, now ranked first.
    pub leader: RankedDonor,
    /// Leader total minus runner-up total, in minor units.
    pub gap: u64,
    /// What a runner-up would have to give to retake the lead, in major
    /// units: the gap plus one.
    pub amount_to_lead: f64,
    /// Everyone sharing the second place total. Each loses the lead.
    pub tied_second: Vec<RankedDonor>,
}

/// Checks `donation` against a ranking that already includes it.
///
/// The donation took the lead when its donor is ranked first, somebody is
/// ranked second, and the donation is larger than the current gap between
/// the two. The gap before the donation is approximated by the gap after
/// it, which is exact only when the donor was the leader already.
///
/// Two webhook calls for different donations may read the same snapshot
/// and both report a change; nothing serializes them.
pub fn detect(donation: &Donation, snapshot: &RankingSnapshot) -> Option<LeadChange> {
    let leader = snapshot.leader()?;
    let runner_up = snapshot.runner_up()?;

    if leader.donor_id != donation.donor_id {
        return None;
    }

    let gap = leader.total.saturating_sub(runner_up.total);
    if donation.amount <= gap {
        return None;
    }

    let tied_second = snapshot
        .donors
        .iter()
        .filter(|d| d.total == runner_up.total && d.donor_id != leader.donor_id)
        .cloned()
        .collect();

    Some(LeadChange {
        leader: leader.clone(),
        gap,
        amount_to_lead: amount_to_lead(gap),
        tied_second,
    })
}

/// `3000` cents -> `31.0`
pub fn amount_to_lead(gap: u64) -> f64 {
    gap as f64 / 100.0 + 1.0
}
