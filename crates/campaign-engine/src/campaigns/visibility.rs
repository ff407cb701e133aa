use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::domain::{Campaign, CampaignId, CampaignSegmentLink, Segment};

/// Segments attached to a campaign, shaped for the HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignSegmentsMeta {
    pub primary: Option<Segment>,
    pub additional: Vec<Segment>,
}

fn required_segments<'a>(
    campaign: &'a Campaign,
    links: &'a BTreeMap<CampaignId, Vec<CampaignSegmentLink>>,
) -> impl Iterator<Item = &'a String> + 'a {
    campaign.primary_segment_id.iter().chain(
        links
            .get(&campaign.id)
            .into_iter()
            .flatten()
            .map(|link| &link.segment_id),
    )
}

/// Visible when the campaign has no segment restrictions, or the user belongs to any of them.
pub fn campaign_matches_segments(
    campaign: &Campaign,
    user_segments: &BTreeSet<String>,
    links: &BTreeMap<CampaignId, Vec<CampaignSegmentLink>>,
) -> bool {
    let mut required = required_segments(campaign, links).peekable();
    if required.peek().is_none() {
        return true;
    }
    required.any(|segment| user_segments.contains(segment))
}

pub fn collect_segment_ids(
    campaigns: &[Campaign],
    links: &BTreeMap<CampaignId, Vec<CampaignSegmentLink>>,
) -> BTreeSet<String> {
    campaigns
        .iter()
        .flat_map(|campaign| required_segments(campaign, links))
        .cloned()
        .collect()
}

/// Primary segment plus the other linked segments, without repeating the primary.
pub fn build_segments_meta(
    campaign: &Campaign,
    links: &BTreeMap<CampaignId, Vec<CampaignSegmentLink>>,
    segments: &HashMap<String, Segment>,
) -> CampaignSegmentsMeta {
    let primary = campaign
        .primary_segment_id
        .as_ref()
        .and_then(|id| segments.get(id))
        .cloned();

    let additional = links
        .get(&campaign.id)
        .into_iter()
        .flatten()
        .filter_map(|link| segments.get(&link.segment_id))
        .filter(|segment| {
            primary
                .as_ref()
                .map_or(true, |primary| primary.id != segment.id)
        })
        .cloned()
        .collect();

    CampaignSegmentsMeta {
        primary,
        additional,
    }
}

/// Positive numbers are floored; anything else (absent, zero, negative, junk) is `None`.
pub fn parse_positive_number(raw: Option<&str>) -> Option<u64> {
    let parsed = raw?.trim().parse::<f64>().ok()?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return None;
    }
    let floored = parsed.floor();
    (floored >= 1.0).then_some(floored as u64)
}
