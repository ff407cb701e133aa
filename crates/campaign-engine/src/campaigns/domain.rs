use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for campaigns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric identifier of a portal user (agent, promoter, or staff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsuarioId(pub i64);

impl fmt::Display for UsuarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

impl CampaignStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }

    pub fn normalize(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Campaign definition owned by the admin subsystem; read-only during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub status: CampaignStatus,
    #[serde(default)]
    pub active_range: ActiveRange,
    #[serde(default)]
    pub primary_segment_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Campaign {
    /// A campaign is live when it is `active` and `at` falls inside its range.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active && self.active_range.contains(at)
    }
}

/// Postgres-style range text (`[2025-01-01,2025-07-01)`) kept verbatim for round trips.
///
/// Empty or `infinity` bounds are open-ended; a range that cannot be parsed is treated as
/// unbounded so a malformed catalog row never hides a campaign by accident.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ActiveRange {
    raw: String,
    lower: Option<RangeBound>,
    upper: Option<RangeBound>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeBound {
    at: DateTime<Utc>,
    inclusive: bool,
}

impl ActiveRange {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let mut range = Self {
            raw: trimmed.to_string(),
            lower: None,
            upper: None,
        };

        if !trimmed.contains(',') || trimmed.len() < 3 {
            return range;
        }

        let lower_inclusive = match trimmed.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return range,
        };
        let upper_inclusive = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return range,
        };

        let inner = &trimmed[1..trimmed.len() - 1];
        let Some((start, end)) = inner.split_once(',') else {
            return range;
        };

        range.lower = parse_boundary(start).map(|at| RangeBound {
            at,
            inclusive: lower_inclusive,
        });
        range.upper = parse_boundary(end).map(|at| RangeBound {
            at,
            inclusive: upper_inclusive,
        });
        range
    }

    /// `[start,end)` over calendar dates.
    pub fn half_open(start: NaiveDate, end: NaiveDate) -> Self {
        Self::parse(&format!(
            "[{},{})",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(lower) = self.lower {
            let before = if lower.inclusive {
                at < lower.at
            } else {
                at <= lower.at
            };
            if before {
                return false;
            }
        }

        if let Some(upper) = self.upper {
            let after = if upper.inclusive {
                at > upper.at
            } else {
                at >= upper.at
            };
            if after {
                return false;
            }
        }

        true
    }
}

impl From<String> for ActiveRange {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ActiveRange> for String {
    fn from(value: ActiveRange) -> Self {
        value.raw
    }
}

fn parse_boundary(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim().trim_matches('"');
    match trimmed {
        "" | "infinity" | "+infinity" | "-infinity" => return None,
        _ => {}
    }

    if trimmed.len() <= 10 {
        let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()?;
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Eligibility,
    Goal,
}

impl RuleScope {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Eligibility => "eligibility",
            Self::Goal => "goal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "eligibility" => Some(Self::Eligibility),
            "goal" => Some(Self::Goal),
            _ => None,
        }
    }
}

/// Closed vocabulary of rule kinds; anything else is kept verbatim as `Unsupported`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleKind {
    Role,
    Segment,
    CountPolicies,
    TotalPremium,
    RcCount,
    IndexThreshold,
    TenureMonths,
    MetricCondition,
    CustomSql,
    Unsupported(String),
}

impl RuleKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Role => "ROLE",
            Self::Segment => "SEGMENT",
            Self::CountPolicies => "COUNT_POLICIES",
            Self::TotalPremium => "TOTAL_PREMIUM",
            Self::RcCount => "RC_COUNT",
            Self::IndexThreshold => "INDEX_THRESHOLD",
            Self::TenureMonths => "TENURE_MONTHS",
            Self::MetricCondition => "METRIC_CONDITION",
            Self::CustomSql => "CUSTOM_SQL",
            Self::Unsupported(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

impl From<String> for RuleKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ROLE" => Self::Role,
            "SEGMENT" => Self::Segment,
            "COUNT_POLICIES" => Self::CountPolicies,
            "TOTAL_PREMIUM" => Self::TotalPremium,
            "RC_COUNT" => Self::RcCount,
            "INDEX_THRESHOLD" => Self::IndexThreshold,
            "TENURE_MONTHS" => Self::TenureMonths,
            "METRIC_CONDITION" => Self::MetricCondition,
            "CUSTOM_SQL" => Self::CustomSql,
            _ => Self::Unsupported(value),
        }
    }
}

impl From<RuleKind> for String {
    fn from(value: RuleKind) -> Self {
        value.as_str().to_string()
    }
}

/// A single declarative rule attached to a campaign. `config` stays opaque JSON until it is
/// decoded into a typed [`RuleConfig`](super::evaluation::RuleConfig).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRule {
    pub id: String,
    pub campaign_id: CampaignId,
    pub scope: RuleScope,
    pub rule_kind: RuleKind,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSegmentLink {
    pub campaign_id: CampaignId,
    pub segment_id: String,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReward {
    pub id: String,
    pub campaign_id: CampaignId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_accumulative: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_true() -> bool {
    true
}

/// Caller-supplied facts about the user that rules may consult besides the metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignEvaluationContext {
    #[serde(default)]
    pub usuario_rol: Option<String>,
    #[serde(default)]
    pub segment_ids: Vec<String>,
    #[serde(default)]
    pub segment_slugs: Vec<String>,
}

/// Authenticated portal user as resolved from the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsuarioSesion {
    pub id: UsuarioId,
    #[serde(default)]
    pub rol: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub activo: bool,
}

impl UsuarioSesion {
    pub fn is_admin(&self) -> bool {
        matches!(
            self.rol.as_deref().and_then(normalize_role).as_deref(),
            Some("admin" | "superusuario" | "super_usuario")
        )
    }
}

/// Lower-cases and trims a role name; `super usuario` folds into `super_usuario`.
pub fn normalize_role(role: &str) -> Option<String> {
    let normalized = role.trim().to_lowercase();
    match normalized.as_str() {
        "" => None,
        "super usuario" => Some("super_usuario".to_string()),
        _ => Some(normalized),
    }
}
