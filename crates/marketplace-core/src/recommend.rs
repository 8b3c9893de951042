use std::collections::btree_map::{self, BTreeMap};

use crate::{ListingId, ProfileId};

/// How a repeated `(profile, listing)` score combines with the existing one.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ScoreMode {
    #[default]
    Replace,
    Cumulative,
}

/// Scores for one profile, kept in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserScores {
    entries: Vec<(ListingId, f64)>,
    index: BTreeMap<ListingId, usize>,
}

impl UserScores {
    /// Non-finite scores are ignored; cumulative sums saturate at `±f64::MAX`
    /// so every stored score stays finite.
    pub fn add(&mut self, listing_id: ListingId, score: f64, mode: ScoreMode) {
        if !score.is_finite() {
            return;
        }
        match self.index.get(&listing_id) {
            Some(&position) => {
                let current = &mut self.entries[position].1;
                match mode {
                    ScoreMode::Replace => *current = score,
                    ScoreMode::Cumulative => *current = saturating_sum(*current, score),
                }
            }
            None => {
                self.index.insert(listing_id, self.entries.len());
                self.entries.push((listing_id, score));
            }
        }
    }

    #[must_use]
    pub fn get(&self, listing_id: ListingId) -> Option<f64> {
        self.index.get(&listing_id).map(|&position| self.entries[position].1)
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(ListingId, f64)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `limit` entries by descending score. Ties keep insertion order.
    #[must_use]
    pub fn ranked(&self, limit: usize) -> Vec<(ListingId, f64)> {
        let mut ranked = self.entries.clone();
        // sort_by is stable, so equal scores stay in insertion order.
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1));
        ranked.truncate(limit);
        ranked
    }
}

/// Output of one strategy: profile id to ordered listing scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommenderResultSet {
    profiles: BTreeMap<ProfileId, UserScores>,
}

impl RecommenderResultSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a score. Non-finite scores are dropped.
    pub fn add(&mut self, profile_id: ProfileId, listing_id: ListingId, score: f64, mode: ScoreMode) {
        if !score.is_finite() {
            tracing::debug!(%profile_id, %listing_id, score, "dropping non-finite score");
            return;
        }
        self.profiles.entry(profile_id).or_default().add(listing_id, score, mode);
    }

    #[must_use]
    pub fn scores(&self, profile_id: ProfileId) -> Option<&UserScores> {
        self.profiles.get(&profile_id)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ProfileId, UserScores> {
        self.profiles.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl<'a> IntoIterator for &'a RecommenderResultSet {
    type Item = (&'a ProfileId, &'a UserScores);
    type IntoIter = btree_map::Iter<'a, ProfileId, UserScores>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn saturating_sum(left: f64, right: f64) -> f64 {
    let sum = left + right;
    if sum.is_finite() {
        sum
    } else if sum > 0.0 {
        f64::MAX
    } else {
        f64::MIN
    }
}

/// Linearly rescale `value` from `[old_min, old_max]` into `[new_min, new_max]`.
///
/// A zero-width input range maps every value to `new_min`.
#[must_use]
pub fn map_numbers(value: f64, old_min: f64, old_max: f64, new_min: f64, new_max: f64) -> f64 {
    let old_range = old_max - old_min;
    if old_range == 0.0 {
        return new_min;
    }
    (value - old_min) * (new_max - new_min) / old_range + new_min
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn replace_overwrites_and_cumulative_sums() {
        let mut results = RecommenderResultSet::new();
        let profile = ProfileId(1);
        results.add(profile, ListingId(10), 2.0, ScoreMode::Replace);
        results.add(profile, ListingId(10), 5.0, ScoreMode::Replace);
        results.add(profile, ListingId(11), 3.0, ScoreMode::Cumulative);
        results.add(profile, ListingId(11), 2.0, ScoreMode::Cumulative);

        let Some(scores) = results.scores(profile) else {
            panic!("profile should have scores");
        };
        assert_eq!(scores.get(ListingId(10)), Some(5.0));
        assert_eq!(scores.get(ListingId(11)), Some(5.0));
        assert_eq!(scores.entries(), &[(ListingId(10), 5.0), (ListingId(11), 5.0)]);
    }

    #[test]
    fn non_finite_scores_are_ignored() {
        let mut results = RecommenderResultSet::new();
        results.add(ProfileId(1), ListingId(1), f64::NAN, ScoreMode::Replace);
        results.add(ProfileId(1), ListingId(2), f64::INFINITY, ScoreMode::Cumulative);
        assert!(results.is_empty());
    }

    #[test]
    fn cumulative_sums_saturate_instead_of_overflowing() {
        let mut results = RecommenderResultSet::new();
        let profile = ProfileId(1);
        results.add(profile, ListingId(1), 1e308, ScoreMode::Cumulative);
        results.add(profile, ListingId(1), 1e308, ScoreMode::Cumulative);
        results.add(profile, ListingId(2), -1e308, ScoreMode::Cumulative);
        results.add(profile, ListingId(2), -1e308, ScoreMode::Cumulative);

        let Some(scores) = results.scores(profile) else {
            panic!("profile should have scores");
        };
        assert_eq!(scores.get(ListingId(1)), Some(f64::MAX));
        assert_eq!(scores.get(ListingId(2)), Some(f64::MIN));
        assert!(scores.entries().iter().all(|(_, score)| score.is_finite()));

        let mut direct = UserScores::default();
        direct.add(ListingId(3), f64::NAN, ScoreMode::Cumulative);
        direct.add(ListingId(4), 1.0, ScoreMode::Cumulative);
        direct.add(ListingId(4), f64::INFINITY, ScoreMode::Cumulative);
        assert_eq!(direct.entries(), &[(ListingId(4), 1.0)]);
    }

    #[test]
    fn ranked_breaks_ties_by_insertion_order() {
        let mut scores = UserScores::default();
        scores.add(ListingId(3), 1.0, ScoreMode::Replace);
        scores.add(ListingId(1), 4.0, ScoreMode::Replace);
        scores.add(ListingId(2), 1.0, ScoreMode::Replace);
        scores.add(ListingId(4), 4.0, ScoreMode::Replace);

        assert_eq!(
            scores.ranked(3),
            vec![(ListingId(1), 4.0), (ListingId(4), 4.0), (ListingId(3), 1.0)]
        );
    }

    #[test]
    fn map_numbers_hits_endpoints() {
        assert!((map_numbers(1.0, 1.0, 1.0, 2.0, 5.0) - 2.0).abs() < f64::EPSILON);
        assert!((map_numbers(1.0, 1.0, 4.0, 2.0, 5.0) - 2.0).abs() < f64::EPSILON);
        assert!((map_numbers(4.0, 1.0, 4.0, 2.0, 5.0) - 5.0).abs() < f64::EPSILON);
        assert!((map_numbers(2.5, 1.0, 4.0, 2.0, 5.0) - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn map_numbers_rescales_bookmark_counts_into_two_to_five() {
        let counts = [1.0, 1.0, 2.0, 5.0];
        let mapped = counts.map(|count| map_numbers(count, 1.0, 5.0, 2.0, 5.0));
        let expected = [2.0, 2.0, 2.75, 5.0];
        for (actual, want) in mapped.iter().zip(expected) {
            assert!((actual - want).abs() < 1e-12, "mapped {mapped:?}");
        }
    }

    #[test]
    fn map_numbers_zero_range_maps_everything_to_new_min() {
        for value in [-3.0, 0.0, 3.0, 7.5] {
            assert!((map_numbers(value, 3.0, 3.0, 2.0, 5.0) - 2.0).abs() < f64::EPSILON);
        }
        assert!((map_numbers(3.0, 3.0, 3.0, -1.0, 1.0) + 1.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn map_numbers_is_monotone_and_bounded(
            old_min in 0u32..100,
            width in 1u32..100,
            a in 0u32..100,
            b in 0u32..100,
        ) {
            let old_max = f64::from(old_min + width);
            let old_min = f64::from(old_min);
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let low = old_min + f64::from(low % (width + 1));
            let high = old_min + f64::from(high % (width + 1));
            let (low, high) = if low <= high { (low, high) } else { (high, low) };

            let mapped_low = map_numbers(low, old_min, old_max, 2.0, 5.0);
            let mapped_high = map_numbers(high, old_min, old_max, 2.0, 5.0);
            prop_assert!(mapped_low <= mapped_high + 1e-9);
            prop_assert!(mapped_low >= 2.0 - 1e-9);
            prop_assert!(mapped_high <= 5.0 + 1e-9);
        }

        #[test]
        fn ranked_is_non_increasing(scores in proptest::collection::vec(-50i32..50, 0..40)) {
            let mut user = UserScores::default();
            for (offset, score) in scores.iter().enumerate() {
                let id = i64::try_from(offset).unwrap_or(i64::MAX);
                user.add(ListingId(id), f64::from(*score), ScoreMode::Replace);
            }
            let ranked = user.ranked(20);
            prop_assert!(ranked.len() <= 20);
            prop_assert!(ranked.windows(2).all(|pair| pair[0].1 >= pair[1].1));
        }
    }
}
