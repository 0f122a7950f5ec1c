//! Splicing of two vintages of the same aggregate
//!
//! An index that is re-based upstream is published as an old and a new
//! vintage. The older vintage is rescaled onto the newer basis and the newer
//! values win wherever both exist, producing one continuous history.

use crate::data::TimeSeriesData;
use index_math::{scale_factor, Month};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do when the vintages share no month
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceFallback {
    /// Rescale by `new_first / old_last`
    #[default]
    LastOldFirstNew,
    /// Keep only the newer vintage
    Disabled,
}

/// How a spliced series was produced
#[derive(Debug, Clone, PartialEq)]
pub enum SpliceMode {
    /// Older vintage rescaled at the latest common month
    Overlap { anchor: Month, factor: f64 },
    /// No common month; rescaled across the gap between the vintages
    Adjacent {
        old_last: Month,
        new_first: Month,
        factor: f64,
    },
    /// Degraded: the older vintage could not be rescaled and was dropped
    NewerOnly { reason: String },
    /// The newer vintage was empty; the older one is returned unchanged
    OlderOnly,
}

impl SpliceMode {
    /// True when part of the history was discarded
    pub fn is_degraded(&self) -> bool {
        matches!(self, SpliceMode::NewerOnly { .. } | SpliceMode::OlderOnly)
    }

    /// Applied rescaling factor, if any
    pub fn factor(&self) -> Option<f64> {
        match self {
            SpliceMode::Overlap { factor, .. } | SpliceMode::Adjacent { factor, .. } => {
                Some(*factor)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SpliceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpliceMode::Overlap { anchor, factor } => {
                write!(f, "overlap at {} (factor {:.6})", anchor, factor)
            }
            SpliceMode::Adjacent {
                old_last,
                new_first,
                factor,
            } => write!(
                f,
                "adjacent {} -> {} (factor {:.6})",
                old_last, new_first, factor
            ),
            SpliceMode::NewerOnly { reason } => write!(f, "newer vintage only: {}", reason),
            SpliceMode::OlderOnly => f.write_str("older vintage only"),
        }
    }
}

/// A continuous series and how it was stitched
#[derive(Debug, Clone, PartialEq)]
pub struct Spliced {
    pub series: TimeSeriesData,
    pub mode: SpliceMode,
}

/// Splice `older` onto the basis of `newer`
pub fn splice(older: &TimeSeriesData, newer: &TimeSeriesData, fallback: SpliceFallback) -> Spliced {
    if newer.is_empty() {
        tracing::warn!("newer vintage is empty; keeping older vintage unscaled");
        return Spliced {
            series: older.clone(),
            mode: SpliceMode::OlderOnly,
        };
    }
    if older.is_empty() {
        return newer_only(newer, "older vintage is empty");
    }

    let overlap = newer
        .points()
        .iter()
        .rev()
        .find_map(|p| older.value_at(p.month).map(|old| (p.month, p.value, old)));

    let mode = match overlap {
        Some((anchor, new_value, old_value)) => match scale_factor(new_value, old_value) {
            Some(factor) => SpliceMode::Overlap { anchor, factor },
            None => return newer_only(newer, &format!("unusable anchor value at {}", anchor)),
        },
        None => {
            if fallback == SpliceFallback::Disabled {
                return newer_only(newer, "vintages do not overlap");
            }
            // Both series are non-empty here
            let (Some(old_last), Some(new_first)) = (older.last(), newer.first()) else {
                return newer_only(newer, "vintages do not overlap");
            };
            match scale_factor(new_first.value, old_last.value) {
                Some(factor) => SpliceMode::Adjacent {
                    old_last: old_last.month,
                    new_first: new_first.month,
                    factor,
                },
                None => return newer_only(newer, "unusable boundary values"),
            }
        }
    };

    let factor = mode.factor().unwrap_or(1.0);
    let rescaled = older
        .points()
        .iter()
        .map(|p| (p.month, p.value * factor));
    let newer_points = newer.points().iter().map(|p| (p.month, p.value));
    let (series, _) = TimeSeriesData::from_unordered(rescaled.chain(newer_points));

    tracing::debug!(mode = %mode, points = series.len(), "spliced vintages");
    Spliced { series, mode }
}

fn newer_only(newer: &TimeSeriesData, reason: &str) -> Spliced {
    tracing::warn!(reason, "splicing degraded to newer vintage only");
    Spliced {
        series: newer.clone(),
        mode: SpliceMode::NewerOnly {
            reason: reason.to_string(),
        },
    }
}
