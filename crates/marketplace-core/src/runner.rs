use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::access::Evaluator;
use crate::merge::{ProfileRecommendations, RecommendationMerger, DEFAULT_TOP_N};
use crate::strategies::RecommenderDirectory;
use crate::{Catalog, ProfileId, RecommendError};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SEARCH_INDEX: &str = "appsmall";

/// Tunables for a recommendation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub top_n: usize,
    /// Profile entries written per store transaction.
    pub batch_size: usize,
    pub search_service_url: Option<String>,
    pub search_index: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            batch_size: DEFAULT_BATCH_SIZE,
            search_service_url: None,
            search_index: DEFAULT_SEARCH_INDEX.to_string(),
        }
    }
}

/// Counts reported by a [`RecommendationSink`] after persisting a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PersistSummary {
    pub profiles_written: usize,
    pub profiles_skipped: usize,
    pub listings_pruned: usize,
    pub batches: usize,
}

/// Write side for merged recommendations.
pub trait RecommendationSink {
    /// Replace each profile's stored blob.
    ///
    /// # Errors
    /// Returns [`RecommendError::Persistence`] when a batch cannot be committed.
    fn save_recommendations(
        &mut self,
        profiles: &BTreeMap<ProfileId, ProfileRecommendations>,
        batch_size: usize,
    ) -> Result<PersistSummary, RecommendError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyOutcome {
    pub engine: String,
    pub friendly_name: String,
    pub weight: f64,
    pub ms_took: f64,
    pub profiles_scored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyFailure {
    pub engine: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub completed: Vec<StrategyOutcome>,
    pub failed: Vec<StrategyFailure>,
    pub persisted: PersistSummary,
}

/// Runs named strategies in sequence, merges their output, persists once.
pub struct RecommenderRunner<'a> {
    directory: &'a RecommenderDirectory,
    access: Evaluator<'a>,
}

impl<'a> RecommenderRunner<'a> {
    #[must_use]
    pub fn new(directory: &'a RecommenderDirectory, access: Evaluator<'a>) -> Self {
        Self { directory, access }
    }

    /// # Errors
    /// Returns [`RecommendError::EngineNotFound`] before any strategy runs if
    /// a name is unregistered, and persistence errors from `sink`. Strategy
    /// failures are reported in [`RunReport::failed`] instead.
    pub fn run(
        &self,
        names: &[String],
        catalog: &dyn Catalog,
        sink: &mut dyn RecommendationSink,
    ) -> Result<RunReport, RecommendError> {
        let mut strategies = Vec::with_capacity(names.len());
        for name in names {
            strategies.push((name.as_str(), self.directory.create(name)?));
        }

        let config = self.directory.config();
        let mut merger = RecommendationMerger::new(config.top_n);
        let mut completed = Vec::new();
        let mut failed = Vec::new();

        for (engine, mut strategy) in strategies {
            let started = Instant::now();
            let scored = strategy.initiate().and_then(|()| strategy.score(catalog, self.access));
            let ms_took = started.elapsed().as_secs_f64() * 1000.0;

            match scored {
                Ok(results) => {
                    let profiles_scored =
                        merger.merge(strategy.friendly_name(), strategy.weight(), &results, ms_took);
                    tracing::info!(engine, ms_took, profiles_scored, "recommender finished");
                    completed.push(StrategyOutcome {
                        engine: engine.to_string(),
                        friendly_name: strategy.friendly_name().to_string(),
                        weight: strategy.weight(),
                        ms_took,
                        profiles_scored,
                    });
                }
                Err(err) => {
                    tracing::warn!(engine, error = %err, "recommender failed; skipping");
                    failed.push(StrategyFailure { engine: engine.to_string(), error: err.to_string() });
                }
            }
        }

        let persisted = sink.save_recommendations(merger.profiles(), config.batch_size)?;
        tracing::info!(
            profiles_written = persisted.profiles_written,
            profiles_skipped = persisted.profiles_skipped,
            listings_pruned = persisted.listings_pruned,
            batches = persisted.batches,
            "recommendations persisted"
        );

        Ok(RunReport { completed, failed, persisted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::default_policy;
    use crate::recommend::RecommenderResultSet;
    use crate::strategies::tests::{bookmark, listing, profile, serve_search_stub, FakeCatalog};
    use crate::strategies::Recommender;

    #[derive(Default)]
    struct MemorySink {
        saved: Vec<BTreeMap<ProfileId, ProfileRecommendations>>,
    }

    impl RecommendationSink for MemorySink {
        fn save_recommendations(
            &mut self,
            profiles: &BTreeMap<ProfileId, ProfileRecommendations>,
            batch_size: usize,
        ) -> Result<PersistSummary, RecommendError> {
            self.saved.push(profiles.clone());
            Ok(PersistSummary {
                profiles_written: profiles.len(),
                batches: profiles.len().div_ceil(batch_size),
                ..PersistSummary::default()
            })
        }
    }

    struct Failing;

    impl Recommender for Failing {
        fn friendly_name(&self) -> &str {
            "Failing"
        }

        fn weight(&self) -> f64 {
            1.0
        }

        fn initiate(&mut self) -> Result<(), RecommendError> {
            Err(RecommendError::BackingServiceUnavailable {
                engine: "Failing".to_string(),
                reason: "down".to_string(),
            })
        }

        fn score(
            &self,
            _catalog: &dyn Catalog,
            _access: Evaluator<'_>,
        ) -> Result<RecommenderResultSet, RecommendError> {
            Ok(RecommenderResultSet::new())
        }
    }

    fn catalog() -> FakeCatalog {
        FakeCatalog {
            profiles: vec![profile(1, "UNCLASSIFIED"), profile(2, "SECRET")],
            listings: vec![listing(1, "UNCLASSIFIED"), listing(2, "SECRET")],
            bookmarks: vec![bookmark(1, 1), bookmark(2, 1), bookmark(2, 2)],
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[test]
    fn unknown_engine_fails_before_any_work() {
        let directory = RecommenderDirectory::new(EngineConfig::default());
        let runner = RecommenderRunner::new(&directory, Evaluator::updated(default_policy()));
        let mut sink = MemorySink::default();

        let result = runner.run(&names(&["custom", "surprise_user_base"]), &catalog(), &mut sink);
        assert_eq!(result, Err(RecommendError::EngineNotFound("surprise_user_base".to_string())));
        assert!(sink.saved.is_empty());
    }

    #[test]
    fn failing_strategy_is_reported_and_others_persist() {
        let mut directory = RecommenderDirectory::new(EngineConfig::default());
        directory.register("failing", |_| Box::new(Failing));
        let runner = RecommenderRunner::new(&directory, Evaluator::updated(default_policy()));
        let mut sink = MemorySink::default();

        let report = match runner.run(&names(&["failing", "sample_data"]), &catalog(), &mut sink) {
            Ok(report) => report,
            Err(err) => panic!("run should succeed: {err}"),
        };
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].engine, "failing");
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].friendly_name, "Sample Data");
        assert_eq!(report.persisted.profiles_written, 2);
        assert_eq!(sink.saved.len(), 1);

        let Some(blob) = sink.saved[0].get(&ProfileId(1)) else {
            panic!("profile 1 should be saved");
        };
        assert!(!blob.strategies.contains_key("Failing"));
        let Some(entry) = blob.strategies.get("Sample Data") else {
            panic!("sample entry should exist");
        };
        assert_eq!(entry.recommendations, vec![(crate::ListingId(1), 1.0)]);
    }

    #[test]
    fn malformed_search_payload_is_reported_as_failed_strategy() {
        let directory = RecommenderDirectory::new(EngineConfig {
            search_service_url: Some(serve_search_stub()),
            search_index: "broken".to_string(),
            ..EngineConfig::default()
        });
        let runner = RecommenderRunner::new(&directory, Evaluator::updated(default_policy()));
        let mut sink = MemorySink::default();

        let report = match runner.run(
            &names(&["elasticsearch_content_base", "sample_data"]),
            &catalog(),
            &mut sink,
        ) {
            Ok(report) => report,
            Err(err) => panic!("run should succeed: {err}"),
        };
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].engine, "elasticsearch_content_base");
        assert!(report.failed[0].error.contains("no hits array"), "error: {}", report.failed[0].error);
        assert_eq!(report.completed.len(), 1);

        let Some(blob) = sink.saved[0].get(&ProfileId(1)) else {
            panic!("profile 1 should be saved");
        };
        assert!(!blob.strategies.contains_key("Elasticsearch Content Filtering"));
    }

    #[test]
    fn repeated_engine_name_keeps_first_result() {
        let directory = RecommenderDirectory::new(EngineConfig { top_n: 1, ..EngineConfig::default() });
        let runner = RecommenderRunner::new(&directory, Evaluator::updated(default_policy()));
        let mut sink = MemorySink::default();

        let report = match runner.run(&names(&["sample_data", "sample_data"]), &catalog(), &mut sink) {
            Ok(report) => report,
            Err(err) => panic!("run should succeed: {err}"),
        };
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.completed[1].profiles_scored, 0);

        let Some(blob) = sink.saved[0].get(&ProfileId(2)) else {
            panic!("profile 2 should be saved");
        };
        let Some(entry) = blob.strategies.get("Sample Data") else {
            panic!("sample entry should exist");
        };
        assert_eq!(entry.recommendations.len(), 1);
    }
}
