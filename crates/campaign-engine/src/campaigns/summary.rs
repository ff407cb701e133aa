use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::CampaignId;
use super::evaluation::CampaignProgressStatus;
use super::snapshot::CampaignProgressSnapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCounts {
    pub total: usize,
    pub eligible_total: usize,
    pub completed: usize,
    pub active: usize,
    pub not_eligible: usize,
}

/// Aggregate view of every cached snapshot for a campaign, for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgressSummary {
    pub campaign_id: CampaignId,
    pub total: usize,
    pub eligible_total: usize,
    pub completed_total: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub progress_counts: ProgressCounts,
}

pub fn summarize_progress(
    campaign_id: &CampaignId,
    snapshots: &[CampaignProgressSnapshot],
) -> CampaignProgressSummary {
    let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut counts = ProgressCounts::default();

    for snapshot in snapshots
        .iter()
        .filter(|snapshot| &snapshot.campaign_id == campaign_id)
    {
        *status_counts
            .entry(snapshot.status.as_str().to_string())
            .or_default() += 1;
        if snapshot.eligible {
            counts.eligible_total += 1;
        }
        match snapshot.status {
            CampaignProgressStatus::Completed => counts.completed += 1,
            CampaignProgressStatus::Eligible => counts.active += 1,
            CampaignProgressStatus::NotEligible => counts.not_eligible += 1,
        }
    }
    counts.total = status_counts.values().sum();

    CampaignProgressSummary {
        campaign_id: campaign_id.clone(),
        total: counts.total,
        eligible_total: counts.eligible_total,
        completed_total: counts.completed,
        status_counts,
        progress_counts: counts,
    }
}
