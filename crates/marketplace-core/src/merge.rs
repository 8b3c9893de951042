use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::recommend::RecommenderResultSet;
use crate::{ListingId, ProfileId};

pub const DEFAULT_TOP_N: usize = 20;

/// One strategy's contribution to a profile's blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyRecommendations {
    /// Non-increasing by score.
    pub recommendations: Vec<(ListingId, f64)>,
    pub weight: f64,
    pub ms_took: f64,
}

/// Persisted per-profile blob: friendly name to that strategy's top-N.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct ProfileRecommendations {
    pub strategies: BTreeMap<String, StrategyRecommendations>,
}

impl ProfileRecommendations {
    /// Combined ranking across strategies: each score scaled by its strategy
    /// weight and summed per listing.
    #[must_use]
    pub fn weighted_ranking(&self) -> Vec<(ListingId, f64)> {
        let mut order = Vec::new();
        let mut totals: BTreeMap<ListingId, f64> = BTreeMap::new();
        for entry in self.strategies.values() {
            for (listing_id, score) in &entry.recommendations {
                let total = totals.entry(*listing_id).or_insert_with(|| {
                    order.push(*listing_id);
                    0.0
                });
                *total += score * entry.weight;
            }
        }

        let mut ranked = order
            .into_iter()
            .map(|listing_id| (listing_id, totals.get(&listing_id).copied().unwrap_or_default()))
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1));
        ranked
    }

    /// Drop listings `keep` rejects; returns how many entries were removed.
    pub fn retain_listings(&mut self, mut keep: impl FnMut(ListingId) -> bool) -> usize {
        let mut removed = 0;
        for entry in self.strategies.values_mut() {
            let before = entry.recommendations.len();
            entry.recommendations.retain(|(listing_id, _)| keep(*listing_id));
            removed += before - entry.recommendations.len();
        }
        removed
    }
}

/// Accumulates strategy outputs into per-profile blobs.
#[derive(Debug, Clone)]
pub struct RecommendationMerger {
    top_n: usize,
    profiles: BTreeMap<ProfileId, ProfileRecommendations>,
}

impl Default for RecommendationMerger {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_N)
    }
}

impl RecommendationMerger {
    #[must_use]
    pub fn new(top_n: usize) -> Self {
        Self { top_n, profiles: BTreeMap::new() }
    }

    /// Fold one strategy's result set in.
    ///
    /// The first write for a `(profile, friendly_name)` pair wins; later
    /// writes for the same pair are ignored. Returns the number of profiles
    /// that received a new entry.
    pub fn merge(
        &mut self,
        friendly_name: &str,
        weight: f64,
        results: &RecommenderResultSet,
        elapsed_ms: f64,
    ) -> usize {
        let mut written = 0;
        for (profile_id, scores) in results {
            let blob = self.profiles.entry(*profile_id).or_default();
            if blob.strategies.contains_key(friendly_name) {
                continue;
            }
            blob.strategies.insert(
                friendly_name.to_string(),
                StrategyRecommendations {
                    recommendations: scores.ranked(self.top_n),
                    weight,
                    ms_took: elapsed_ms,
                },
            );
            written += 1;
        }
        written
    }

    #[must_use]
    pub fn profiles(&self) -> &BTreeMap<ProfileId, ProfileRecommendations> {
        &self.profiles
    }

    #[must_use]
    pub fn into_profiles(self) -> BTreeMap<ProfileId, ProfileRecommendations> {
        self.profiles
    }
}
