//! Raw attribute values to non-negative integer counts.
//!
//! Health indicator columns arrive as whatever the source file holds: numeric
//! fields, numeric-looking strings, `"N/A"`, nulls. Every one of them is turned
//! into a count here and nowhere else. Anything that is not already a clean
//! non-negative number becomes 0 (or is truncated) and leaves a
//! [`CoercionWarning`] behind. The [`ValueFrame`] built once per render is what
//! the classifier, the map tooltips, the table and the totals all read, so the
//! four always show the same number for the same feature.

use crate::registry::LayerDefinition;
use crate::types::Dataset;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Largest count kept as-is: every count up to here is exact as an `f64`,
/// which is what the classifier reads. Larger values are zeroed.
pub const MAX_COUNT: u64 = 1 << 53;

/// A value that had to be zeroed or truncated. Expected for real data; never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionWarning {
    pub feature_index: usize,
    pub column: String,
    /// `None` when the attribute was absent altogether.
    pub raw: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coercion {
    pub value: u64,
    pub lossy: bool,
}

impl Coercion {
    fn clean(value: u64) -> Self {
        Self { value, lossy: false }
    }

    fn zero() -> Self {
        Self {
            value: 0,
            lossy: true,
        }
    }
}

fn from_f64(v: f64) -> Coercion {
    if !v.is_finite() || v < 0.0 || v > MAX_COUNT as f64 {
        return Coercion::zero();
    }
    let truncated = v.trunc();
    Coercion {
        value: truncated as u64,
        lossy: truncated != v,
    }
}

pub fn coerce_count(raw: Option<&Value>) -> Coercion {
    match raw {
        Some(Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                if u > MAX_COUNT {
                    Coercion::zero()
                } else {
                    Coercion::clean(u)
                }
            } else if n.is_i64() {
                // negative integer
                Coercion::zero()
            } else {
                n.as_f64().map(from_f64).unwrap_or_else(Coercion::zero)
            }
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(from_f64)
            .unwrap_or_else(|_| Coercion::zero()),
        _ => Coercion::zero(),
    }
}

/// Coerced counts for every (indicator, feature) pair of one render.
#[derive(Debug, Clone)]
pub struct ValueFrame {
    columns: Vec<Vec<u64>>,
    pub warnings: Vec<CoercionWarning>,
}

impl ValueFrame {
    pub fn build(dataset: &Dataset, def: &LayerDefinition) -> Self {
        let mut warnings = Vec::new();
        let columns = def
            .indicators
            .iter()
            .map(|(_, column)| {
                dataset
                    .features
                    .iter()
                    .enumerate()
                    .map(|(feature_index, feature)| {
                        let raw = feature.attribute(column);
                        let c = coerce_count(raw);
                        if c.lossy {
                            warnings.push(CoercionWarning {
                                feature_index,
                                column: column.to_string(),
                                raw: raw.cloned(),
                            });
                        }
                        c.value
                    })
                    .collect()
            })
            .collect();

        if !warnings.is_empty() {
            debug!(
                layer = %dataset.layer,
                count = warnings.len(),
                "coerced non-numeric or missing indicator values"
            );
        }

        Self { columns, warnings }
    }

    /// Counts for one indicator, in feature order.
    pub fn column(&self, indicator: usize) -> &[u64] {
        &self.columns[indicator]
    }

    pub fn value(&self, indicator: usize, feature: usize) -> u64 {
        self.columns[indicator][feature]
    }

    pub fn numeric(&self, indicator: usize) -> Vec<f64> {
        self.columns[indicator].iter().map(|&v| v as f64).collect()
    }

    /// Saturates at `u64::MAX` for very long columns of maximal counts.
    pub fn total(&self, indicator: usize) -> u64 {
        self.columns[indicator]
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }
}
