use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Loosely typed metric value as produced by the aggregation queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<MetricValue>),
    Table(BTreeMap<String, MetricValue>),
}

impl MetricValue {
    /// Numeric reading: finite numbers and numeric strings; everything else is `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) if value.is_finite() => Some(*value),
            Self::Text(raw) => {
                let parsed = raw.trim().parse::<f64>().ok()?;
                parsed.is_finite().then_some(parsed)
            }
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(flag) => Some(flag.to_string()),
            Self::Number(value) => Some(format_number(*value)),
            Self::Text(raw) => Some(raw.clone()),
            Self::List(_) | Self::Table(_) => serde_json::to_string(self).ok(),
        }
    }

    pub fn as_table(&self) -> Option<&BTreeMap<String, MetricValue>> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Renders integral floats without a trailing `.0` so text comparisons see `3`, not `3.0`.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

pub type MetricGroup = BTreeMap<String, MetricValue>;

/// Immutable bundle of a user's business facts used as evaluation input.
///
/// Group maps are ordered so the serialized form, and therefore the fingerprint, is canonical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignEvaluationMetrics {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub polizas: MetricGroup,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cancelaciones: MetricGroup,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rc: MetricGroup,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub candidatos: MetricGroup,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub planificacion: MetricGroup,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clientes: MetricGroup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenure_meses: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub datasets: BTreeMap<String, MetricGroup>,
}

impl CampaignEvaluationMetrics {
    /// One of the fixed top-level groups, by its exact name.
    pub fn builtin_group(&self, name: &str) -> Option<&MetricGroup> {
        match name {
            "polizas" => Some(&self.polizas),
            "cancelaciones" => Some(&self.cancelaciones),
            "rc" => Some(&self.rc),
            "candidatos" => Some(&self.candidatos),
            "planificacion" => Some(&self.planificacion),
            "clientes" => Some(&self.clientes),
            _ => None,
        }
    }

    fn builtin_group_mut(&mut self, name: &str) -> Option<&mut MetricGroup> {
        match name {
            "polizas" => Some(&mut self.polizas),
            "cancelaciones" => Some(&mut self.cancelaciones),
            "rc" | "prospectos" => Some(&mut self.rc),
            "candidatos" => Some(&mut self.candidatos),
            "planificacion" => Some(&mut self.planificacion),
            "clientes" => Some(&mut self.clientes),
            _ => None,
        }
    }

    /// Stores a value in a built-in group, or in `datasets[group]` for any other name.
    pub fn insert(&mut self, group: &str, field: &str, value: impl Into<MetricValue>) {
        let value = value.into();
        if group == "tenure" && field == "tenure_meses" {
            self.tenure_meses = value.as_number();
            return;
        }
        match self.builtin_group_mut(group) {
            Some(target) => {
                target.insert(field.to_string(), value);
            }
            None => {
                self.datasets
                    .entry(group.to_string())
                    .or_default()
                    .insert(field.to_string(), value);
            }
        }
    }

    pub fn with(mut self, group: &str, field: &str, value: impl Into<MetricValue>) -> Self {
        self.insert(group, field, value);
        self
    }

    /// Walks `path` from the metrics root; `datasets.<name>.<field>` reaches custom bags.
    pub fn resolve_path(&self, path: &[String]) -> Option<MetricValue> {
        let (head, rest) = path.split_first()?;
        match head.as_str() {
            "tenure_meses" if rest.is_empty() => self.tenure_meses.map(MetricValue::Number),
            "datasets" => {
                let (name, rest) = rest.split_first()?;
                descend_group(self.datasets.get(name)?, rest)
            }
            other => descend_group(self.builtin_group(other)?, rest),
        }
    }

    /// Field lookup by dataset name: built-in groups (with `prospectos` as an alias for `rc`),
    /// `tenure`, or a custom dataset bag.
    pub fn dataset_value(&self, dataset: &str, field: &str) -> Option<MetricValue> {
        let group = match dataset {
            "prospectos" => Some(&self.rc),
            "tenure" if field == "tenure_meses" => {
                return self.tenure_meses.map(MetricValue::Number);
            }
            "tenure" => return None,
            other => self
                .builtin_group(other)
                .or_else(|| self.datasets.get(other)),
        }?;
        group.get(field).cloned()
    }

    /// Whole custom dataset bag as a table value.
    pub fn dataset_table(&self, dataset: &str) -> Option<MetricValue> {
        self.datasets
            .get(dataset)
            .map(|group| MetricValue::Table(group.clone()))
    }

    /// SHA-256 hex digest of the canonical JSON encoding.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

fn descend_group(group: &MetricGroup, rest: &[String]) -> Option<MetricValue> {
    match rest.split_first() {
        None => Some(MetricValue::Table(group.clone())),
        Some((key, rest)) => descend_value(group.get(key)?, rest),
    }
}

fn descend_value(value: &MetricValue, rest: &[String]) -> Option<MetricValue> {
    match rest.split_first() {
        None => Some(value.clone()),
        Some((key, rest)) => descend_value(value.as_table()?.get(key)?, rest),
    }
}
