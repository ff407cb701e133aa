use serde_json::{Map, Value};
use thiserror::Error;

use super::operators::{MetricOperator, ValueType};
use crate::campaigns::datasets::dataset_definition;
use crate::campaigns::domain::{normalize_role, RuleKind};
use crate::campaigns::metrics::format_number;

/// Why a stored rule config could not be decoded into a [`RuleConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleConfigError {
    #[error("rule kind '{0}' is not supported")]
    UnsupportedKind(String),
    #[error("rule config must be a JSON object")]
    NotAnObject,
    #[error("metric condition requires a dataset")]
    MissingDataset,
    #[error("metric condition requires a field")]
    MissingField,
    #[error("metric condition operator '{0}' is not recognised")]
    UnknownOperator(String),
}

impl RuleConfigError {
    /// Stable reason code surfaced in `RuleResult.details.reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedKind(_) => "rule_kind_not_supported",
            _ => "invalid_rule_config",
        }
    }
}

/// Decoded rule configuration: the kind-specific condition plus the modifiers every kind shares.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConfig {
    pub condition: RuleCondition,
    pub negate: bool,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleCondition {
    Role(RoleCondition),
    Segment(SegmentCondition),
    CountPolicies(NumericCondition),
    TotalPremium(NumericCondition),
    RcCount(NumericCondition),
    IndexThreshold(IndexThresholdCondition),
    TenureMonths(NumericCondition),
    MetricCondition(MetricCondition),
    CustomSql(CustomSqlCondition),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleCondition {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentMatch {
    #[default]
    Id,
    Slug,
}

impl SegmentMatch {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Slug => "slug",
        }
    }

    pub fn normalize(self, value: &str) -> String {
        match self {
            Self::Id => value.trim().to_string(),
            Self::Slug => value.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentCondition {
    pub match_by: SegmentMatch,
    pub require_all: Vec<String>,
    pub require_any: Vec<String>,
    pub exclude: Vec<String>,
}

/// Inclusive `min`/`max`, exclusive `gt`/`lt`, and exact `eq` bounds; all optional.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NumericBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub eq: Option<f64>,
}

impl NumericBounds {
    pub fn is_unconstrained(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.gt.is_none()
            && self.lt.is_none()
            && self.eq.is_none()
    }

    /// No bounds always admits; otherwise a missing value never does.
    pub fn admits(&self, value: Option<f64>) -> bool {
        if self.is_unconstrained() {
            return true;
        }
        let Some(value) = value.filter(|value| value.is_finite()) else {
            return false;
        };
        self.min.map_or(true, |min| value >= min)
            && self.max.map_or(true, |max| value <= max)
            && self.gt.map_or(true, |gt| value > gt)
            && self.lt.map_or(true, |lt| value < lt)
            && self.eq.map_or(true, |eq| value == eq)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericCondition {
    pub field: String,
    pub bounds: NumericBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSource {
    Polizas,
    Cancelaciones,
    Rc,
}

impl MetricSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polizas => "polizas",
            Self::Cancelaciones => "cancelaciones",
            Self::Rc => "rc",
        }
    }

    /// Explicit source when recognised, otherwise inferred from the field name.
    pub fn resolve(source: Option<&str>, field: &str) -> Self {
        match source.map(|raw| raw.trim().to_lowercase()).as_deref() {
            Some("polizas") => Self::Polizas,
            Some("cancelaciones") => Self::Cancelaciones,
            Some("rc") => Self::Rc,
            _ => Self::infer(field),
        }
    }

    pub fn infer(field: &str) -> Self {
        match field {
            "momentum_vita" => Self::Polizas,
            "momentum_neto" => Self::Cancelaciones,
            "reclutas_calidad" | "prospectos_total" => Self::Rc,
            other if other.starts_with("rc_") => Self::Rc,
            _ => Self::Cancelaciones,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexCheck {
    pub name: Option<String>,
    pub source: MetricSource,
    pub field: String,
    pub bounds: NumericBounds,
}

/// One or more index checks; `grouped` is set when the config used the `indices` array form.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexThresholdCondition {
    pub checks: Vec<IndexCheck>,
    pub grouped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricCondition {
    pub dataset: String,
    pub field: String,
    pub path: Vec<String>,
    pub operator: MetricOperator,
    pub value_type: ValueType,
    pub expected: Value,
    /// Entry key for keyed datasets, built from the rule's lookup parameter.
    pub lookup_key: Option<String>,
}

impl MetricCondition {
    pub fn expected_text(&self) -> String {
        value_text(&self.expected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomSqlCondition {
    pub passed: Option<bool>,
    pub message: Option<String>,
}

const KNOWN_PREMIUM_FIELDS: &[&str] = &[
    "total",
    "vigentes",
    "anuladas",
    "prima_total_mxn",
    "prima_vigente_mxn",
    "prima_promedio_mxn",
    "comision_base_mxn",
    "ingresos_mxn",
    "puntos_totales",
    "momentum_vita",
];

impl RuleConfig {
    /// Decodes the opaque JSON stored alongside a rule. `null` decodes as an empty object.
    pub fn decode(kind: &RuleKind, raw: &Value) -> Result<Self, RuleConfigError> {
        let empty = Map::new();
        let object = match raw {
            Value::Object(object) => object,
            Value::Null => &empty,
            _ => return Err(RuleConfigError::NotAnObject),
        };
        let config = ConfigObject(object);

        let condition = match kind {
            RuleKind::Role => RuleCondition::Role(decode_role(&config)),
            RuleKind::Segment => RuleCondition::Segment(decode_segment(&config)),
            RuleKind::CountPolicies => RuleCondition::CountPolicies(NumericCondition {
                field: count_policies_field(&config).to_string(),
                bounds: config.bounds(),
            }),
            RuleKind::TotalPremium => RuleCondition::TotalPremium(NumericCondition {
                field: total_premium_field(&config),
                bounds: config.bounds(),
            }),
            RuleKind::RcCount => RuleCondition::RcCount(NumericCondition {
                field: config
                    .raw_string("field")
                    .unwrap_or("reclutas_calidad")
                    .to_string(),
                bounds: config.bounds(),
            }),
            RuleKind::IndexThreshold => RuleCondition::IndexThreshold(decode_index(&config)),
            RuleKind::TenureMonths => RuleCondition::TenureMonths(NumericCondition {
                field: "tenure_meses".to_string(),
                bounds: config.bounds(),
            }),
            RuleKind::MetricCondition => {
                RuleCondition::MetricCondition(decode_metric_condition(&config)?)
            }
            RuleKind::CustomSql => RuleCondition::CustomSql(CustomSqlCondition {
                passed: config
                    .boolean(&["passed"])
                    .or_else(|| config.boolean(&["result"])),
                message: config.raw_string("message").map(str::to_string),
            }),
            RuleKind::Unsupported(raw) => {
                return Err(RuleConfigError::UnsupportedKind(raw.clone()));
            }
        };

        Ok(Self {
            condition,
            negate: config.boolean(&["negate"]).unwrap_or(false),
            weight: config.number(&["weight"]),
        })
    }
}

fn decode_role(config: &ConfigObject<'_>) -> RoleCondition {
    let normalize = |values: Vec<String>| {
        unique(
            values
                .iter()
                .filter_map(|value| normalize_role(value))
                .collect(),
        )
    };
    let mut allow = config.strings(&["allow", "allowedRoles"]);
    allow.extend(config.strings(&["allowed"]));
    let mut deny = config.strings(&["deny", "blockedRoles"]);
    deny.extend(config.strings(&["denied"]));

    RoleCondition {
        allow: normalize(allow),
        deny: normalize(deny),
    }
}

fn decode_segment(config: &ConfigObject<'_>) -> SegmentCondition {
    let match_by = match config.raw_string("matchBy") {
        Some("slug") => SegmentMatch::Slug,
        _ => SegmentMatch::Id,
    };
    let normalize = |values: Vec<String>| {
        unique(
            values
                .iter()
                .map(|value| match_by.normalize(value))
                .filter(|value| !value.is_empty())
                .collect(),
        )
    };

    let mut require_all = config.strings(&["all"]);
    require_all.extend(config.strings(&["allOf", "requireAll"]));
    let mut require_any = config.strings(&["include", "required", "segments"]);
    require_any.extend(config.strings(&["any"]));
    require_any.extend(config.strings(&["anyOf", "includeAny", "requireAny"]));

    SegmentCondition {
        match_by,
        require_all: normalize(require_all),
        require_any: normalize(require_any),
        exclude: normalize(config.strings(&["exclude", "block", "disallow"])),
    }
}

fn count_policies_field(config: &ConfigObject<'_>) -> &'static str {
    let candidate = config
        .trimmed_string(&["field"])
        .or_else(|| config.trimmed_string(&["metric"]))
        .map(|value| value.to_lowercase())
        .unwrap_or_default();
    match candidate.as_str() {
        "polizas_total" | "total" | "total_policies" | "polizas" => "total",
        "polizas_anuladas" | "anuladas" => "anuladas",
        _ => "vigentes",
    }
}

fn total_premium_field(config: &ConfigObject<'_>) -> String {
    if let Some(field) = config.trimmed_string(&["field"]) {
        if KNOWN_PREMIUM_FIELDS.contains(&field.as_str()) {
            return field;
        }
    }

    let metric = config
        .trimmed_string(&["metric"])
        .map(|value| value.to_lowercase())
        .unwrap_or_default();
    let field = match metric.as_str() {
        "prima_vigente" | "vigente" => "prima_vigente_mxn",
        "prima_promedio" | "average_premium" => "prima_promedio_mxn",
        "commission" | "commissions" | "comision" | "comisiones" => "comision_base_mxn",
        "income" | "ingreso" | "ingresos" => "ingresos_mxn",
        "points" | "puntos" => "puntos_totales",
        "momentum" | "momentum_vita" => "momentum_vita",
        "vigentes" | "polizas_vigentes" => "vigentes",
        "anuladas" | "polizas_anuladas" => "anuladas",
        "total_policies" | "polizas_total" | "polizas" => "total",
        _ => "prima_total_mxn",
    };
    field.to_string()
}

fn decode_index(config: &ConfigObject<'_>) -> IndexThresholdCondition {
    let entries = match config.0.get("indices") {
        Some(Value::Array(entries)) if !entries.is_empty() => entries,
        _ => {
            return IndexThresholdCondition {
                checks: vec![index_check(config)],
                grouped: false,
            }
        }
    };

    let empty = Map::new();
    let checks = entries
        .iter()
        .map(|entry| {
            let object = entry.as_object().unwrap_or(&empty);
            index_check(&ConfigObject(object))
        })
        .collect();

    IndexThresholdCondition {
        checks,
        grouped: true,
    }
}

fn index_check(config: &ConfigObject<'_>) -> IndexCheck {
    let field = config
        .raw_string("field")
        .unwrap_or("indice_limra")
        .to_string();
    IndexCheck {
        name: config
            .raw_string("name")
            .or_else(|| config.raw_string("label"))
            .map(str::to_string),
        source: MetricSource::resolve(config.raw_string("source"), &field),
        field,
        bounds: config.bounds(),
    }
}

fn decode_metric_condition(config: &ConfigObject<'_>) -> Result<MetricCondition, RuleConfigError> {
    let dataset = config
        .trimmed_string(&["dataset", "source"])
        .ok_or(RuleConfigError::MissingDataset)?;
    let field = config
        .trimmed_string(&["field", "metric"])
        .ok_or(RuleConfigError::MissingField)?;
    let operator_raw = config
        .trimmed_string(&["operator", "comparator"])
        .unwrap_or_default();
    let operator = MetricOperator::parse(&operator_raw)
        .ok_or(RuleConfigError::UnknownOperator(operator_raw))?;

    let definition = dataset_definition(&dataset);
    let registered = definition.and_then(|definition| definition.field(&field));

    let mut path = config.path();
    if path.is_empty() {
        if let Some(registered) = registered {
            path = registered.path.iter().map(|segment| segment.to_string()).collect();
        }
    }

    let value_type = match config.raw_string("valueType") {
        Some(raw) => ValueType::parse(raw),
        None => registered
            .map(|field| field.field_type.value_type())
            .unwrap_or(ValueType::Number),
    };

    let expected = config
        .first(&["valueRaw", "value", "expected"])
        .cloned()
        .unwrap_or(Value::Null);

    let lookup_key = definition
        .and_then(|definition| definition.lookup)
        .and_then(|lookup| {
            let parameter = config.first(&[lookup.param])?;
            let rendered = match parameter {
                Value::Number(number) => {
                    let number = number.as_f64().filter(|value| *value != 0.0)?;
                    format_number(number)
                }
                Value::String(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => return None,
            };
            Some(format!("{}{}", lookup.prefix, rendered))
        });

    Ok(MetricCondition {
        dataset,
        field,
        path,
        operator,
        value_type,
        expected,
        lookup_key,
    })
}

/// Read helpers over a config object. Multi-key reads take the first key holding a non-null
/// value, so aliases behave like a chain of fallbacks.
struct ConfigObject<'a>(&'a Map<String, Value>);

impl<'a> ConfigObject<'a> {
    fn first(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|key| self.0.get(*key))
            .find(|value| !value.is_null())
    }

    fn raw_string(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).and_then(Value::as_str)
    }

    fn trimmed_string(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| self.raw_string(key))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn number(&self, keys: &[&str]) -> Option<f64> {
        self.first(keys).and_then(to_number)
    }

    fn boolean(&self, keys: &[&str]) -> Option<bool> {
        self.first(keys).and_then(to_boolean)
    }

    fn strings(&self, keys: &[&str]) -> Vec<String> {
        self.first(keys).map(to_string_list).unwrap_or_default()
    }

    fn bounds(&self) -> NumericBounds {
        NumericBounds {
            min: self.number(&["min", "minimum", "minValue"]),
            max: self.number(&["max", "maximum", "maxValue"]),
            gt: self.number(&["gt", "greaterThan"]),
            lt: self.number(&["lt", "lessThan"]),
            eq: self.number(&["eq", "equals"]),
        }
    }

    fn path(&self) -> Vec<String> {
        match self.0.get("path") {
            Some(Value::Array(segments)) if segments.iter().all(Value::is_string) => segments
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(dotted)) => dotted
                .split('.')
                .map(str::trim)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub(crate) fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|value| value.is_finite()),
        Value::String(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite()),
        _ => None,
    }
}

pub(crate) fn to_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|value| value != 0.0),
        Value::String(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "si" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Arrays keep their string entries; strings split on commas. Entries are trimmed, blanks dropped.
pub(crate) fn to_string_list(value: &Value) -> Vec<String> {
    let entries: Vec<&str> = match value {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(raw) => raw.split(',').collect(),
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number
            .as_f64()
            .map(format_number)
            .unwrap_or_else(|| number.to_string()),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

fn unique(values: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(values.len());
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}
