use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::config::{to_number, value_text};
use crate::campaigns::metrics::MetricValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Contains,
    NotContains,
    In,
}

impl MetricOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "contains" => Some(Self::Contains),
            "not_contains" => Some(Self::NotContains),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::In => "in",
        }
    }

    /// Label used in human-readable requirement summaries.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Contains => "contiene",
            Self::NotContains => "no contiene",
            Self::In => "en",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Number,
    Text,
}

impl ValueType {
    /// `text` (and `boolean`, which compares as text) selects text; anything else is numeric.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "boolean" => Self::Text,
            _ => Self::Number,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "text",
        }
    }
}

/// Result of one comparison, with the inputs echoed for the rule's debug details.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorOutcome {
    pub passed: bool,
    pub details: Map<String, Value>,
}

/// Compares a runtime metric value against a configured expectation.
///
/// Total over arbitrary input: a missing, `null`, or unparseable actual value fails every
/// operator, and operators that do not apply to the value type fail rather than error.
pub fn apply_operator(
    actual: Option<&MetricValue>,
    operator: MetricOperator,
    expected: &Value,
    value_type: ValueType,
) -> OperatorOutcome {
    let mut details = Map::new();
    details.insert(
        "actual".to_string(),
        actual
            .and_then(|value| serde_json::to_value(value).ok())
            .unwrap_or(Value::Null),
    );
    details.insert("expected".to_string(), expected.clone());
    details.insert("operator".to_string(), json!(operator.as_str()));
    details.insert("valueType".to_string(), json!(value_type.label()));

    let passed = match value_type {
        ValueType::Number => compare_numbers(actual, operator, expected, &mut details),
        ValueType::Text => compare_text(actual, operator, expected, &mut details),
    };

    OperatorOutcome { passed, details }
}

fn compare_numbers(
    actual: Option<&MetricValue>,
    operator: MetricOperator,
    expected: &Value,
    details: &mut Map<String, Value>,
) -> bool {
    let actual = actual.and_then(MetricValue::as_number);
    details.insert("actualNumeric".to_string(), json!(actual));

    if operator == MetricOperator::In {
        let candidates = expected_numbers(expected);
        details.insert("expectedValues".to_string(), json!(candidates));
        return actual.map_or(false, |actual| candidates.contains(&actual));
    }

    let expected = to_number(expected);
    details.insert("expectedNumeric".to_string(), json!(expected));
    let (Some(actual), Some(expected)) = (actual, expected) else {
        return false;
    };

    match operator {
        MetricOperator::Gt => actual > expected,
        MetricOperator::Gte => actual >= expected,
        MetricOperator::Lt => actual < expected,
        MetricOperator::Lte => actual <= expected,
        MetricOperator::Eq => actual == expected,
        MetricOperator::Neq => actual != expected,
        MetricOperator::Contains | MetricOperator::NotContains | MetricOperator::In => false,
    }
}

fn compare_text(
    actual: Option<&MetricValue>,
    operator: MetricOperator,
    expected: &Value,
    details: &mut Map<String, Value>,
) -> bool {
    let actual = actual.and_then(MetricValue::as_text);
    let expected_text = value_text(expected);
    details.insert("actualText".to_string(), json!(actual));
    details.insert("expectedText".to_string(), json!(expected_text));

    let Some(actual) = actual.map(|text| text.to_lowercase()) else {
        return false;
    };
    let wanted = expected_text.to_lowercase();

    match operator {
        MetricOperator::Eq => actual == wanted,
        MetricOperator::Neq => actual != wanted,
        MetricOperator::Contains => wanted.is_empty() || actual.contains(&wanted),
        MetricOperator::NotContains => !wanted.is_empty() && !actual.contains(&wanted),
        MetricOperator::In => {
            let candidates: Vec<String> = expected_value_list(expected)
                .into_iter()
                .map(|entry| entry.trim().to_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect();
            let passed = candidates.contains(&actual);
            details.insert("expectedValues".to_string(), json!(candidates));
            passed
        }
        MetricOperator::Gt | MetricOperator::Gte | MetricOperator::Lt | MetricOperator::Lte => {
            false
        }
    }
}

/// Splits an `in` expectation into entries: arrays stay as-is, text splits on commas.
fn expected_value_list(expected: &Value) -> Vec<String> {
    match expected {
        Value::Array(items) => items.iter().map(value_text).collect(),
        other => value_text(other).split(',').map(str::to_string).collect(),
    }
}

fn expected_numbers(expected: &Value) -> Vec<f64> {
    expected_value_list(expected)
        .iter()
        .filter_map(|entry| entry.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .collect()
}
