//! Ingestion of raw payloads into stored observations

use crate::data::{Observation, SeriesMeta};
use crate::error::Result;
use crate::normalize::{
    normalize, normalize_all, normalize_weights, select_code, Extractor, NormalizeReport,
    NormalizedSeries, RawPayload,
};
use crate::splice::{splice, SpliceFallback, SpliceMode};
use crate::store::ForecastStore;
use serde::Serialize;

/// An older vintage of one category, spliced under the fresh payload
#[derive(Debug, Clone)]
pub struct PreviousVintage<'a> {
    pub payload: &'a RawPayload,
    pub code: String,
    pub fallback: SpliceFallback,
}

/// What an ingestion wrote
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub group: String,
    pub observations_upserted: usize,
    pub categories: Vec<String>,
    /// Category weights written from the weights table, if one was given
    pub weights_upserted: usize,
    pub report: NormalizeReport,
    /// How the previous vintage was spliced, if one was given
    #[serde(skip)]
    pub splice: Option<SpliceMode>,
}

/// Normalizes one payload and upserts it under a group
#[derive(Debug)]
pub struct IngestJob<'a> {
    group: String,
    extractor: &'a dyn Extractor,
    categories: Vec<String>,
    labels: Vec<SeriesMeta>,
    previous: Option<PreviousVintage<'a>>,
    weights: Option<&'a RawPayload>,
}

impl<'a> IngestJob<'a> {
    pub fn new(group: impl Into<String>, extractor: &'a dyn Extractor) -> Self {
        Self {
            group: group.into(),
            extractor,
            categories: Vec::new(),
            labels: Vec::new(),
            previous: None,
            weights: None,
        }
    }

    /// Keep only these category codes (all when empty)
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_labels(mut self, labels: Vec<SeriesMeta>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_previous_vintage(mut self, previous: PreviousVintage<'a>) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Also ingest category weights from a weights table of the same layout
    pub fn with_weights(mut self, weights: &'a RawPayload) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn run<S: ForecastStore + ?Sized>(
        &self,
        store: &mut S,
        payload: &RawPayload,
    ) -> Result<IngestSummary> {
        let (mut series, report) = normalize_all(payload, self.extractor);

        if !self.categories.is_empty() {
            series.retain(|code, _| self.categories.contains(code));
            for code in &self.categories {
                if !series.contains_key(code) {
                    tracing::warn!(group = %self.group, category = %code, "category not found in payload");
                }
            }
        }

        let mut splice_mode = None;
        if let Some(previous) = &self.previous {
            let (older, older_report) =
                normalize(previous.payload, self.extractor, select_code(&previous.code));
            tracing::debug!(
                group = %self.group,
                records = older_report.records,
                accepted = older_report.accepted,
                "normalized previous vintage"
            );
            let newer = series.get(&previous.code).cloned().unwrap_or_default();
            let spliced = splice(&older, &newer, previous.fallback);
            if !spliced.series.is_empty() {
                series.insert(previous.code.clone(), spliced.series);
            }
            splice_mode = Some(spliced.mode);
        }

        let observations: Vec<Observation> = series
            .into_iter()
            .flat_map(|(code, series)| NormalizedSeries { code, series }.observations(&self.group))
            .collect();
        let mut categories: Vec<String> = observations
            .iter()
            .filter_map(|o| o.series_id.code().map(str::to_string))
            .collect();
        categories.dedup();

        let upserted = store.upsert_observations(&observations)?;
        if !self.labels.is_empty() {
            store.upsert_labels(&self.group, &self.labels)?;
        }
        let weights_upserted = match self.weights {
            Some(payload) => {
                let (mut weights, weights_report) = normalize_weights(payload, self.extractor);
                if !self.categories.is_empty() {
                    weights.retain(|w| self.categories.contains(&w.code));
                }
                tracing::debug!(
                    group = %self.group,
                    records = weights_report.records,
                    accepted = weights_report.accepted,
                    "normalized weights"
                );
                store.upsert_weights(&self.group, &weights)?
            }
            None => 0,
        };

        tracing::info!(
            group = %self.group,
            upserted,
            weights = weights_upserted,
            categories = categories.len(),
            missing_values = report.missing_values,
            bad_months = report.bad_months,
            duplicates = report.duplicates,
            "ingested payload"
        );

        Ok(IngestSummary {
            group: self.group.clone(),
            observations_upserted: upserted,
            categories,
            weights_upserted,
            report,
            splice: splice_mode,
        })
    }
}

/// Normalize `payload` and upsert the selected categories of `group`
pub fn ingest<S: ForecastStore + ?Sized>(
    store: &mut S,
    group: &str,
    payload: &RawPayload,
    extractor: &dyn Extractor,
    categories: &[String],
) -> Result<IngestSummary> {
    IngestJob::new(group, extractor)
        .with_categories(categories.to_vec())
        .run(store, payload)
}
