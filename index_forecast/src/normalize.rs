//! Series normalization
//!
//! Turns a raw statistics-table payload into canonical per-category monthly
//! series. The payload is the PX-JSON shape returned by the upstream tables:
//!
//! ```json
//! {"data": [{"key": ["2025M07", "IS00"], "values": ["651.3"]}]}
//! ```
//!
//! Each source family lays out its `key` tuple differently, so record fields
//! are located through an [`Extractor`]. Bad records are data-quality issues:
//! they are counted in a [`NormalizeReport`] and skipped, never raised.

use crate::data::{CategoryWeight, Observation, SeriesId, TimeSeriesData};
use crate::error::Result;
use index_math::Month;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Read;

/// Value strings the tables use for "no data"
const MISSING_SENTINELS: [&str; 5] = ["", ".", "..", "...", "-"];

/// Preferred category codes of the wage index table
const WAGE_CODES: [&str; 5] = ["TOTAL", "ALM", "OPI", "OPI_R", "OPI_L"];

/// A raw cell value: tables emit numbers as strings, occasionally as numbers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Missing,
}

impl RawValue {
    /// Numeric value, `None` for sentinels and unparsable text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(v) => Some(*v),
            RawValue::Text(s) => {
                let s = s.trim();
                if MISSING_SENTINELS.contains(&s) {
                    return None;
                }
                s.parse::<f64>().ok()
            }
            RawValue::Missing => None,
        }
        .filter(|v| v.is_finite())
    }
}

/// One record of a raw payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub values: Vec<RawValue>,
}

/// A raw statistics-table payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPayload {
    #[serde(default)]
    pub data: Vec<RawRecord>,
}

impl RawPayload {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// True for keys shaped like `2025M07`
pub fn is_month_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    bytes.len() == 7
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'M'
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

/// Locates the month key, category key and value of a raw record
pub trait Extractor: Debug {
    /// The month key string, before parsing
    fn month_key<'a>(&self, record: &'a RawRecord) -> Option<&'a str>;

    /// The category (dimension) code the record belongs to
    fn category_key(&self, record: &RawRecord) -> Option<String>;

    /// The numeric value; `None` means "no data"
    fn value(&self, record: &RawRecord) -> Option<f64> {
        record.values.first().and_then(RawValue::as_f64)
    }
}

/// Month and category at fixed positions of the key tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalExtractor {
    pub month_index: usize,
    pub category_index: usize,
}

impl Extractor for PositionalExtractor {
    fn month_key<'a>(&self, record: &'a RawRecord) -> Option<&'a str> {
        record.key.get(self.month_index).map(String::as_str)
    }

    fn category_key(&self, record: &RawRecord) -> Option<String> {
        record.key.get(self.category_index).cloned()
    }
}

/// Month found by shape; category is the key made of a known prefix and digits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedExtractor {
    pub prefixes: Vec<String>,
}

impl TaggedExtractor {
    fn is_category(&self, key: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            key.strip_prefix(prefix.as_str())
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        })
    }
}

impl Extractor for TaggedExtractor {
    fn month_key<'a>(&self, record: &'a RawRecord) -> Option<&'a str> {
        record.key.iter().map(String::as_str).find(|k| is_month_key(k))
    }

    fn category_key(&self, record: &RawRecord) -> Option<String> {
        record.key.iter().find(|k| self.is_category(k)).cloned()
    }
}

/// Month found by shape; category is a preferred code if present, else the
/// remaining keys joined with `:`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedExtractor {
    pub preferred: Vec<String>,
    pub default_code: String,
}

impl Extractor for JoinedExtractor {
    fn month_key<'a>(&self, record: &'a RawRecord) -> Option<&'a str> {
        record.key.iter().map(String::as_str).find(|k| is_month_key(k))
    }

    fn category_key(&self, record: &RawRecord) -> Option<String> {
        let month_pos = record.key.iter().position(|k| is_month_key(k))?;
        let rest: Vec<&str> = record
            .key
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != month_pos)
            .map(|(_, k)| k.as_str())
            .collect();

        if let Some(code) = rest
            .iter()
            .find(|k| self.preferred.iter().any(|p| p == *k))
        {
            return Some(code.to_string());
        }
        match rest.as_slice() {
            [] => Some(self.default_code.clone()),
            [single] => Some(single.to_string()),
            many => Some(many.join(":")),
        }
    }
}

/// Upstream source families and their record layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    /// Consumer price index and its sub-indices
    Cpi,
    /// Wage index
    Wage,
    /// Building construction cost index
    Construction,
    /// Producer price index
    Producer,
}

impl SourceFamily {
    /// The extractor for this family's key layout
    pub fn extractor(&self) -> Box<dyn Extractor> {
        match self {
            SourceFamily::Cpi => Box::new(TaggedExtractor {
                prefixes: vec!["IS".to_string(), "CP".to_string()],
            }),
            SourceFamily::Wage => Box::new(JoinedExtractor {
                preferred: WAGE_CODES.iter().map(|c| c.to_string()).collect(),
                default_code: "TOTAL".to_string(),
            }),
            SourceFamily::Construction | SourceFamily::Producer => Box::new(PositionalExtractor {
                month_index: 0,
                category_index: 1,
            }),
        }
    }

    /// Category code of the family's aggregate series
    pub fn total_code(&self) -> &'static str {
        match self {
            SourceFamily::Cpi => "IS00",
            SourceFamily::Wage => "TOTAL",
            SourceFamily::Construction => "BCI",
            SourceFamily::Producer => "PPI",
        }
    }
}

/// Counts of what normalization kept and dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    /// Records seen
    pub records: usize,
    /// Records that became a point (before deduplication)
    pub accepted: usize,
    /// Records whose value was a "no data" sentinel
    pub missing_values: usize,
    /// Records without a parsable month key
    pub bad_months: usize,
    /// Records without a category key
    pub unclassified: usize,
    /// Records overwritten by a later record for the same month and category
    pub duplicates: usize,
}

impl NormalizeReport {
    pub fn merge(&mut self, other: &NormalizeReport) {
        self.records += other.records;
        self.accepted += other.accepted;
        self.missing_values += other.missing_values;
        self.bad_months += other.bad_months;
        self.unclassified += other.unclassified;
        self.duplicates += other.duplicates;
    }
}

/// Normalized series for one category
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSeries {
    pub code: String,
    pub series: TimeSeriesData,
}

impl NormalizedSeries {
    /// Observations of this series under `group`
    pub fn observations(&self, group: &str) -> Vec<Observation> {
        let series_id = SeriesId::of(group, &self.code);
        self.series
            .points()
            .iter()
            .map(|p| Observation {
                series_id: series_id.clone(),
                month: p.month,
                value: p.value,
            })
            .collect()
    }
}

/// Normalize every category in the payload, keyed by category code
pub fn normalize_all(
    payload: &RawPayload,
    extractor: &dyn Extractor,
) -> (BTreeMap<String, TimeSeriesData>, NormalizeReport) {
    normalize_matching(payload, extractor, |_| true)
}

/// Normalize the categories accepted by `selector` into one series
///
/// When the selector accepts several categories their points are merged in
/// record order, so a later record for a month replaces an earlier one.
pub fn normalize(
    payload: &RawPayload,
    extractor: &dyn Extractor,
    selector: impl Fn(&str) -> bool,
) -> (TimeSeriesData, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let mut points = Vec::new();
    for record in &payload.data {
        report.records += 1;
        if let Some((code, month, value)) = classify(record, extractor, &mut report) {
            if selector(&code) {
                report.accepted += 1;
                points.push((month, value));
            }
        }
    }
    let (series, duplicates) = TimeSeriesData::from_unordered(points);
    report.duplicates = duplicates;
    (series, report)
}

/// Category weights of a weights table
///
/// Weights tables share the layout of the index tables they belong to, so
/// the family's extractor reads them unchanged. Each `(month, code)` cell
/// becomes one weight, ordered by code then month.
pub fn normalize_weights(
    payload: &RawPayload,
    extractor: &dyn Extractor,
) -> (Vec<CategoryWeight>, NormalizeReport) {
    let (series, report) = normalize_all(payload, extractor);
    let weights = series
        .into_iter()
        .flat_map(|(code, series)| {
            series
                .points()
                .iter()
                .map(|p| CategoryWeight {
                    code: code.clone(),
                    month: p.month,
                    weight: p.value,
                })
                .collect::<Vec<_>>()
        })
        .collect();
    (weights, report)
}

/// Selector accepting exactly one category code
pub fn select_code(code: &str) -> impl Fn(&str) -> bool + '_ {
    move |candidate| candidate == code
}

fn normalize_matching(
    payload: &RawPayload,
    extractor: &dyn Extractor,
    selector: impl Fn(&str) -> bool,
) -> (BTreeMap<String, TimeSeriesData>, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let mut grouped: BTreeMap<String, Vec<(Month, f64)>> = BTreeMap::new();

    for record in &payload.data {
        report.records += 1;
        if let Some((code, month, value)) = classify(record, extractor, &mut report) {
            if selector(&code) {
                report.accepted += 1;
                grouped.entry(code).or_default().push((month, value));
            }
        }
    }

    let series = grouped
        .into_iter()
        .map(|(code, points)| {
            let (series, duplicates) = TimeSeriesData::from_unordered(points);
            report.duplicates += duplicates;
            (code, series)
        })
        .filter(|(_, series)| !series.is_empty())
        .collect();

    (series, report)
}

fn classify(
    record: &RawRecord,
    extractor: &dyn Extractor,
    report: &mut NormalizeReport,
) -> Option<(String, Month, f64)> {
    let Some(month) = extractor
        .month_key(record)
        .and_then(|key| Month::parse_px(key).ok())
    else {
        report.bad_months += 1;
        return None;
    };
    let Some(code) = extractor.category_key(record) else {
        report.unclassified += 1;
        return None;
    };
    let Some(value) = extractor.value(record) else {
        report.missing_values += 1;
        return None;
    };
    Some((code, month, value))
}
