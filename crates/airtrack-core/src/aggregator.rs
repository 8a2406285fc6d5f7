//! Aggregation policies for ring-buffer slots.
//!
//! A policy folds a raw sample into an occupied slot
//! ([`Aggregator::combine_element`]), reduces a full bucket of slots to one
//! coarser sample ([`Aggregator::combine_bucket`]), and names the value
//! written into empty slots ([`Aggregator::default_value`]).
//!
//! Policies are plain trait objects chosen when an RRD is built. The three
//! built-ins are selectable by name through [`AggregatorKind`]; anything
//! else can be supplied as a [`CustomAggregator`] of function pointers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// =============================================================================
// Aggregator trait
// =============================================================================

/// Combine/reduce/default strategy used by an RRD.
pub trait Aggregator: fmt::Debug + Send + Sync {
    /// Name written into the record for introspection.
    fn name(&self) -> &str;

    /// Fold `incoming` into a slot currently holding `prior`.
    fn combine_element(&self, prior: i64, incoming: i64) -> i64;

    /// Reduce a bucket of slots to a single value.
    fn combine_bucket(&self, slots: &[i64]) -> i64;

    /// Value representing an empty slot.
    fn default_value(&self) -> i64 {
        0
    }
}

/// Truncating mean over every slot; `fallback` for an empty slice.
fn mean(slots: &[i64], fallback: i64) -> i64 {
    if slots.is_empty() {
        return fallback;
    }
    let sum: i128 = slots.iter().map(|&v| i128::from(v)).sum();
    (sum / slots.len() as i128) as i64
}

// =============================================================================
// Built-in policies
// =============================================================================

/// Adds samples that share a second; averages over all slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumAggregator;

impl Aggregator for SumAggregator {
    fn name(&self) -> &str {
        "default"
    }

    fn combine_element(&self, prior: i64, incoming: i64) -> i64 {
        prior.wrapping_add(incoming)
    }

    fn combine_bucket(&self, slots: &[i64]) -> i64 {
        mean(slots, self.default_value())
    }
}

/// Keeps the stronger reading; averages only non-empty slots.
///
/// Zero is never a legitimate dBm/RSSI reading. It marks an empty slot:
/// merging with it keeps the other reading and rollups skip it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeakSignalAggregator;

impl Aggregator for PeakSignalAggregator {
    fn name(&self) -> &str {
        "peak_signal"
    }

    fn combine_element(&self, prior: i64, incoming: i64) -> i64 {
        match (prior, incoming) {
            (0, other) | (other, 0) => other,
            (a, b) => a.max(b),
        }
    }

    fn combine_bucket(&self, slots: &[i64]) -> i64 {
        let (sum, count) = slots
            .iter()
            .filter(|&&v| v != 0)
            .fold((0i128, 0i128), |(sum, count), &v| {
                (sum + i128::from(v), count + 1)
            });
        if count == 0 {
            return self.default_value();
        }
        (sum / count) as i64
    }
}

/// Keeps the most extreme reading; averages over all slots.
///
/// Both negative: the lower. Both positive: the higher. One zero: the
/// other. Mixed signs: the negative one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtremeAggregator;

impl Aggregator for ExtremeAggregator {
    fn name(&self) -> &str {
        "extreme"
    }

    fn combine_element(&self, prior: i64, incoming: i64) -> i64 {
        match (prior, incoming) {
            (a, b) if a < 0 && b < 0 => a.min(b),
            (a, b) if a > 0 && b > 0 => a.max(b),
            (0, b) => b,
            (a, 0) => a,
            (a, b) => a.min(b),
        }
    }

    fn combine_bucket(&self, slots: &[i64]) -> i64 {
        mean(slots, self.default_value())
    }
}

// =============================================================================
// Custom policies
// =============================================================================

/// Policy assembled from plain functions.
#[derive(Clone)]
pub struct CustomAggregator {
    name: String,
    combine_element: fn(i64, i64) -> i64,
    combine_bucket: fn(&[i64]) -> i64,
    default_value: i64,
}

impl CustomAggregator {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        combine_element: fn(i64, i64) -> i64,
        combine_bucket: fn(&[i64]) -> i64,
        default_value: i64,
    ) -> Self {
        Self {
            name: name.into(),
            combine_element,
            combine_bucket,
            default_value,
        }
    }
}

impl fmt::Debug for CustomAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAggregator")
            .field("name", &self.name)
            .field("default_value", &self.default_value)
            .finish_non_exhaustive()
    }
}

impl Aggregator for CustomAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn combine_element(&self, prior: i64, incoming: i64) -> i64 {
        (self.combine_element)(prior, incoming)
    }

    fn combine_bucket(&self, slots: &[i64]) -> i64 {
        (self.combine_bucket)(slots)
    }

    fn default_value(&self) -> i64 {
        self.default_value
    }
}

// =============================================================================
// AggregatorKind
// =============================================================================

/// Built-in policies selectable from config or the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorKind {
    /// [`SumAggregator`].
    #[default]
    Default,
    /// [`PeakSignalAggregator`].
    PeakSignal,
    /// [`ExtremeAggregator`].
    Extreme,
}

impl AggregatorKind {
    /// Shared instance of the policy.
    #[must_use]
    pub fn build(self) -> Arc<dyn Aggregator> {
        match self {
            Self::Default => Arc::new(SumAggregator),
            Self::PeakSignal => Arc::new(PeakSignalAggregator),
            Self::Extreme => Arc::new(ExtremeAggregator),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::PeakSignal => "peak_signal",
            Self::Extreme => "extreme",
        }
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an [`AggregatorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown aggregator `{0}` (expected default, peak_signal or extreme)")]
pub struct ParseAggregatorError(String);

impl FromStr for AggregatorKind {
    type Err = ParseAggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" | "sum" => Ok(Self::Default),
            "peak_signal" | "peak" => Ok(Self::PeakSignal),
            "extreme" => Ok(Self::Extreme),
            other => Err(ParseAggregatorError(other.to_string())),
        }
    }
}
