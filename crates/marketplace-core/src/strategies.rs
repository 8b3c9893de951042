//! Recommender strategies and the name to factory table that builds them.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::access::Evaluator;
use crate::recommend::{map_numbers, RecommenderResultSet, ScoreMode};
use crate::runner::EngineConfig;
use crate::{
    BookmarkSnapshot, Catalog, ListingId, ListingSnapshot, ProfileId, ProfileSnapshot,
    RecommendError,
};

const SAMPLE_LISTINGS_PER_PROFILE: usize = 10;
const LISTINGS_PER_SIGNAL: usize = 36;
const FEATURED_SCORE: f64 = 3.0;
const RECENT_SCORE: f64 = 2.0;
const BOOKMARK_SCORE_MIN: f64 = 2.0;
const BOOKMARK_SCORE_MAX: f64 = 5.0;
const RELATED_LISTINGS_LIMIT: usize = 36;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

/// One independently scored recommendation strategy.
pub trait Recommender {
    /// Label the strategy's output is stored under.
    fn friendly_name(&self) -> &str;

    fn weight(&self) -> f64;

    /// One-time setup. An error here aborts only this strategy.
    ///
    /// # Errors
    /// Returns [`RecommendError::BackingServiceUnavailable`] when a required
    /// service cannot be reached.
    fn initiate(&mut self) -> Result<(), RecommendError> {
        Ok(())
    }

    /// # Errors
    /// Returns an error when the catalog or a backing service fails mid-run.
    fn score(
        &self,
        catalog: &dyn Catalog,
        access: Evaluator<'_>,
    ) -> Result<RecommenderResultSet, RecommendError>;
}

/// Catalog rows loaded once per scoring pass.
struct CatalogView {
    profiles: Vec<ProfileSnapshot>,
    listings: Vec<ListingSnapshot>,
    bookmarks: Vec<BookmarkSnapshot>,
}

impl CatalogView {
    fn load(catalog: &dyn Catalog) -> Result<Self, RecommendError> {
        Ok(Self {
            profiles: catalog.profiles()?,
            listings: catalog.listings()?,
            bookmarks: catalog.bookmarks()?,
        })
    }

    /// Live listings `profile` may see, in catalog order.
    fn visible<'a>(
        &'a self,
        profile: &'a ProfileSnapshot,
        access: Evaluator<'a>,
    ) -> impl Iterator<Item = &'a ListingSnapshot> + 'a {
        self.listings.iter().filter(move |listing| {
            listing.is_live() && access.permits(&profile.access, listing.security_marking.as_deref())
        })
    }

    fn visible_ids(&self, profile: &ProfileSnapshot, access: Evaluator<'_>) -> BTreeSet<ListingId> {
        self.visible(profile, access).map(|listing| listing.listing_id).collect()
    }

    fn bookmarks_by_profile(&self) -> BTreeMap<ProfileId, BTreeSet<ListingId>> {
        let mut grouped: BTreeMap<ProfileId, BTreeSet<ListingId>> = BTreeMap::new();
        for bookmark in &self.bookmarks {
            grouped.entry(bookmark.profile_id).or_default().insert(bookmark.listing_id);
        }
        grouped
    }
}

/// Every profile gets its first visible listings at a flat score.
#[derive(Debug, Clone, Default)]
pub struct SampleDataRecommender;

impl Recommender for SampleDataRecommender {
    fn friendly_name(&self) -> &str {
        "Sample Data"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn score(
        &self,
        catalog: &dyn Catalog,
        access: Evaluator<'_>,
    ) -> Result<RecommenderResultSet, RecommendError> {
        let view = CatalogView::load(catalog)?;
        let mut results = RecommenderResultSet::new();
        for profile in &view.profiles {
            for listing in view.visible(profile, access).take(SAMPLE_LISTINGS_PER_PROFILE) {
                results.add(profile.profile_id, listing.listing_id, 1.0, ScoreMode::Replace);
            }
        }
        Ok(results)
    }
}

/// Blend of featured, recent, popular and frequently bookmarked listings.
#[derive(Debug, Clone, Default)]
pub struct CustomHybridRecommender;

impl CustomHybridRecommender {
    fn newest_first(listings: &mut [&ListingSnapshot]) {
        listings.sort_by_key(|listing| Reverse(listing.approved_at));
    }
}

impl Recommender for CustomHybridRecommender {
    fn friendly_name(&self) -> &str {
        "Custom Hybrid"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn score(
        &self,
        catalog: &dyn Catalog,
        access: Evaluator<'_>,
    ) -> Result<RecommenderResultSet, RecommendError> {
        let view = CatalogView::load(catalog)?;
        let mut results = RecommenderResultSet::new();

        for profile in &view.profiles {
            let profile_id = profile.profile_id;
            let visible = view.visible(profile, access).collect::<Vec<_>>();

            let mut featured =
                visible.iter().copied().filter(|listing| listing.is_featured).collect::<Vec<_>>();
            Self::newest_first(&mut featured);
            for listing in featured.into_iter().take(LISTINGS_PER_SIGNAL) {
                results.add(profile_id, listing.listing_id, FEATURED_SCORE, ScoreMode::Cumulative);
            }

            let mut recent =
                visible.iter().copied().filter(|listing| !listing.is_featured).collect::<Vec<_>>();
            Self::newest_first(&mut recent);
            for listing in recent.into_iter().take(LISTINGS_PER_SIGNAL) {
                results.add(profile_id, listing.listing_id, RECENT_SCORE, ScoreMode::Cumulative);
            }

            let mut popular = visible.clone();
            popular.sort_by(|left, right| {
                right
                    .avg_rate
                    .total_cmp(&left.avg_rate)
                    .then_with(|| right.total_reviews.cmp(&left.total_reviews))
            });
            for listing in popular.into_iter().take(LISTINGS_PER_SIGNAL) {
                if listing.avg_rate != 0.0 {
                    results.add(profile_id, listing.listing_id, listing.avg_rate, ScoreMode::Cumulative);
                }
            }

            // Bookmark counts across all profiles, limited to what this profile may see.
            let visible_ids = visible.iter().map(|listing| listing.listing_id).collect::<BTreeSet<_>>();
            let mut counts: BTreeMap<ListingId, u32> = BTreeMap::new();
            for bookmark in &view.bookmarks {
                if visible_ids.contains(&bookmark.listing_id) {
                    *counts.entry(bookmark.listing_id).or_default() += 1;
                }
            }
            let mut by_count = counts.into_iter().collect::<Vec<_>>();
            by_count.sort_by_key(|(_, count)| *count);

            let old_min = by_count.iter().map(|(_, count)| *count).min().map_or(1, |min| min.min(1));
            let old_max = by_count.iter().map(|(_, count)| *count).max().map_or(1, |max| max.max(1));
            for (listing_id, count) in by_count {
                let score = map_numbers(
                    f64::from(count),
                    f64::from(old_min),
                    f64::from(old_max),
                    BOOKMARK_SCORE_MIN,
                    BOOKMARK_SCORE_MAX,
                );
                results.add(profile_id, listing_id, score, ScoreMode::Cumulative);
            }
        }

        Ok(results)
    }
}

/// External content-similarity search used by [`SearchContentRecommender`].
pub trait SearchBackend {
    /// # Errors
    /// Returns a description of the failure when the service is down.
    fn health(&self) -> Result<(), String>;

    /// Listings similar to `seeds`, best match first.
    ///
    /// # Errors
    /// Returns a description of the failure when the query cannot be served.
    fn related_listings(
        &self,
        seeds: &[ListingId],
        limit: usize,
    ) -> Result<Vec<(ListingId, f64)>, String>;
}

/// Elasticsearch-compatible HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpSearchBackend {
    base_url: String,
    index: String,
    agent: ureq::Agent,
}

impl HttpSearchBackend {
    #[must_use]
    pub fn new(base_url: &str, index: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(SEARCH_TIMEOUT).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            agent,
        }
    }
}

impl SearchBackend for HttpSearchBackend {
    fn health(&self) -> Result<(), String> {
        let url = format!("{}/_cluster/health", self.base_url);
        let response: serde_json::Value = self
            .agent
            .get(&url)
            .call()
            .map_err(|err| format!("health check failed: {err}"))?
            .into_json()
            .map_err(|err| format!("health response unreadable: {err}"))?;

        match response["status"].as_str() {
            Some("green" | "yellow") => Ok(()),
            Some(status) => Err(format!("cluster status is {status}")),
            None => Err("health response has no status".to_string()),
        }
    }

    fn related_listings(
        &self,
        seeds: &[ListingId],
        limit: usize,
    ) -> Result<Vec<(ListingId, f64)>, String> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let like = seeds
            .iter()
            .map(|seed| serde_json::json!({"_index": self.index, "_id": seed.0.to_string()}))
            .collect::<Vec<_>>();
        let query = serde_json::json!({
            "size": limit,
            "_source": false,
            "query": {
                "more_like_this": {
                    "fields": ["title", "description", "description_short", "tags"],
                    "like": like,
                    "min_term_freq": 1,
                    "min_doc_freq": 1
                }
            }
        });

        let url = format!("{}/{}/_search", self.base_url, self.index);
        let response: serde_json::Value = self
            .agent
            .post(&url)
            .send_json(query)
            .map_err(|err| format!("search failed: {err}"))?
            .into_json()
            .map_err(|err| format!("search response unreadable: {err}"))?;

        let hits = response["hits"]["hits"]
            .as_array()
            .ok_or_else(|| "search response has no hits array".to_string())?;
        Ok(hits
            .iter()
            .filter_map(|hit| {
                let id = hit["_id"].as_str()?.parse::<i64>().ok()?;
                let score = hit["_score"].as_f64().unwrap_or(1.0);
                Some((ListingId(id), score))
            })
            .collect())
    }
}

/// Content similarity of each profile's bookmarks, served by a search backend.
pub struct SearchContentRecommender {
    backend: Option<Box<dyn SearchBackend>>,
}

impl SearchContentRecommender {
    #[must_use]
    pub fn new(backend: Box<dyn SearchBackend>) -> Self {
        Self { backend: Some(backend) }
    }

    /// Strategy with no backend configured; `initiate` will fail.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self { backend: None }
    }

    fn unavailable(&self, reason: impl Into<String>) -> RecommendError {
        RecommendError::BackingServiceUnavailable {
            engine: self.friendly_name().to_string(),
            reason: reason.into(),
        }
    }

    fn backend(&self) -> Result<&dyn SearchBackend, RecommendError> {
        self.backend.as_deref().ok_or_else(|| self.unavailable("search service url is not configured"))
    }
}

impl Recommender for SearchContentRecommender {
    fn friendly_name(&self) -> &str {
        "Elasticsearch Content Filtering"
    }

    fn weight(&self) -> f64 {
        0.9
    }

    fn initiate(&mut self) -> Result<(), RecommendError> {
        self.backend()?.health().map_err(|reason| self.unavailable(reason))
    }

    fn score(
        &self,
        catalog: &dyn Catalog,
        access: Evaluator<'_>,
    ) -> Result<RecommenderResultSet, RecommendError> {
        let backend = self.backend()?;
        let view = CatalogView::load(catalog)?;
        let bookmarks = view.bookmarks_by_profile();
        let mut results = RecommenderResultSet::new();

        for profile in &view.profiles {
            let Some(owned) = bookmarks.get(&profile.profile_id) else {
                continue;
            };
            let visible = view.visible_ids(profile, access);
            let seeds = owned.iter().copied().filter(|id| visible.contains(id)).collect::<Vec<_>>();
            if seeds.is_empty() {
                continue;
            }

            let related = backend
                .related_listings(&seeds, RELATED_LISTINGS_LIMIT)
                .map_err(|reason| self.unavailable(reason))?;
            for (listing_id, score) in related {
                if visible.contains(&listing_id) && !owned.contains(&listing_id) {
                    results.add(profile.profile_id, listing_id, score, ScoreMode::Cumulative);
                }
            }
        }

        Ok(results)
    }
}

/// Profile to bookmarked listing to co-bookmarking profiles to their listings.
#[derive(Debug, Clone, Default)]
pub struct GraphCollaborativeRecommender;

impl Recommender for GraphCollaborativeRecommender {
    fn friendly_name(&self) -> &str {
        "Graph Collaborative Filtering"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn score(
        &self,
        catalog: &dyn Catalog,
        access: Evaluator<'_>,
    ) -> Result<RecommenderResultSet, RecommendError> {
        let view = CatalogView::load(catalog)?;
        let by_profile = view.bookmarks_by_profile();
        let mut by_listing: BTreeMap<ListingId, BTreeSet<ProfileId>> = BTreeMap::new();
        for bookmark in &view.bookmarks {
            by_listing.entry(bookmark.listing_id).or_default().insert(bookmark.profile_id);
        }

        let mut results = RecommenderResultSet::new();
        for profile in &view.profiles {
            let Some(owned) = by_profile.get(&profile.profile_id) else {
                continue;
            };
            let visible = view.visible_ids(profile, access);

            for listing_id in owned {
                let Some(peers) = by_listing.get(listing_id) else {
                    continue;
                };
                for peer in peers.iter().filter(|peer| **peer != profile.profile_id) {
                    let Some(peer_listings) = by_profile.get(peer) else {
                        continue;
                    };
                    for candidate in peer_listings {
                        if !owned.contains(candidate) && visible.contains(candidate) {
                            results.add(profile.profile_id, *candidate, 1.0, ScoreMode::Cumulative);
                        }
                    }
                }
            }
        }

        Ok(results)
    }
}

type Factory = Box<dyn Fn(&EngineConfig) -> Box<dyn Recommender> + Send + Sync>;

/// Name to factory table of registered strategies.
pub struct RecommenderDirectory {
    config: EngineConfig,
    factories: BTreeMap<String, Factory>,
}

impl RecommenderDirectory {
    /// Directory with every built-in strategy registered.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let mut directory = Self { config, factories: BTreeMap::new() };
        directory.register("sample_data", |_| Box::new(SampleDataRecommender));
        directory.register("custom", |_| Box::new(CustomHybridRecommender));
        directory.register("elasticsearch_content_base", |config| {
            Box::new(match config.search_service_url.as_deref() {
                Some(url) => SearchContentRecommender::new(Box::new(HttpSearchBackend::new(
                    url,
                    &config.search_index,
                ))),
                None => SearchContentRecommender::unconfigured(),
            })
        });
        directory.register("graph_collaborative_filtering", |_| {
            Box::new(GraphCollaborativeRecommender)
        });
        directory
    }

    /// Add or replace a strategy under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&EngineConfig) -> Box<dyn Recommender> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// # Errors
    /// Returns [`RecommendError::EngineNotFound`] for an unregistered name.
    pub fn create(&self, name: &str) -> Result<Box<dyn Recommender>, RecommendError> {
        self.factories
            .get(name)
            .map(|factory| factory(&self.config))
            .ok_or_else(|| RecommendError::EngineNotFound(name.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::net::TcpListener;
    use std::thread;

    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::access::AccessProfile;
    use crate::policy::default_policy;
    use crate::ApprovalStatus;

    #[derive(Default)]
    pub(crate) struct FakeCatalog {
        pub(crate) profiles: Vec<ProfileSnapshot>,
        pub(crate) listings: Vec<ListingSnapshot>,
        pub(crate) bookmarks: Vec<BookmarkSnapshot>,
    }

    impl Catalog for FakeCatalog {
        fn profiles(&self) -> Result<Vec<ProfileSnapshot>, RecommendError> {
            Ok(self.profiles.clone())
        }

        fn listings(&self) -> Result<Vec<ListingSnapshot>, RecommendError> {
            Ok(self.listings.clone())
        }

        fn bookmarks(&self) -> Result<Vec<BookmarkSnapshot>, RecommendError> {
            Ok(self.bookmarks.clone())
        }
    }

    pub(crate) fn profile(id: i64, clearance: &str) -> ProfileSnapshot {
        ProfileSnapshot {
            profile_id: ProfileId(id),
            username: format!("user{id}"),
            access: AccessProfile {
                clearances: ["UNCLASSIFIED", clearance].iter().map(|c| (*c).to_string()).collect(),
                ..AccessProfile::default()
            },
            anonymize_identifiable_data: None,
        }
    }

    pub(crate) fn listing(id: i64, marking: &str) -> ListingSnapshot {
        ListingSnapshot {
            listing_id: ListingId(id),
            title: format!("Listing {id}"),
            security_marking: Some(marking.to_string()),
            is_featured: false,
            is_enabled: true,
            is_deleted: false,
            approval_status: ApprovalStatus::Approved,
            approved_at: Some(id),
            avg_rate: 0.0,
            total_reviews: 0,
        }
    }

    pub(crate) fn bookmark(profile: i64, listing: i64) -> BookmarkSnapshot {
        BookmarkSnapshot { profile_id: ProfileId(profile), listing_id: ListingId(listing) }
    }

    fn score_of(results: &RecommenderResultSet, profile: i64, listing: i64) -> Option<f64> {
        results.scores(ProfileId(profile)).and_then(|scores| scores.get(ListingId(listing)))
    }

    fn run(strategy: &dyn Recommender, catalog: &FakeCatalog) -> RecommenderResultSet {
        match strategy.score(catalog, Evaluator::updated(default_policy())) {
            Ok(results) => results,
            Err(err) => panic!("strategy should score: {err}"),
        }
    }

    #[test]
    fn sample_data_takes_first_ten_visible_listings() {
        let mut catalog = FakeCatalog { profiles: vec![profile(1, "UNCLASSIFIED")], ..FakeCatalog::default() };
        catalog.listings.push(listing(100, "SECRET"));
        for id in 1..=12 {
            catalog.listings.push(listing(id, "UNCLASSIFIED"));
        }

        let results = run(&SampleDataRecommender, &catalog);
        let Some(scores) = results.scores(ProfileId(1)) else {
            panic!("profile should be scored");
        };
        assert_eq!(scores.len(), 10);
        assert_eq!(scores.entries()[0], (ListingId(1), 1.0));
        assert_eq!(scores.get(ListingId(100)), None);
        assert_eq!(scores.get(ListingId(11)), None);
    }

    #[test]
    fn custom_hybrid_blends_signals() {
        let mut featured = listing(1, "UNCLASSIFIED");
        featured.is_featured = true;
        let mut rated = listing(2, "UNCLASSIFIED");
        rated.avg_rate = 4.5;
        let mut disabled = listing(3, "UNCLASSIFIED");
        disabled.is_enabled = false;
        let catalog = FakeCatalog {
            profiles: vec![profile(1, "UNCLASSIFIED"), profile(2, "UNCLASSIFIED")],
            listings: vec![featured, rated, disabled, listing(4, "UNCLASSIFIED"), listing(5, "SECRET")],
            bookmarks: vec![bookmark(1, 2), bookmark(2, 2), bookmark(1, 4), bookmark(2, 5), bookmark(1, 3)],
        };

        let results = run(&CustomHybridRecommender, &catalog);
        // featured only
        assert_eq!(score_of(&results, 1, 1), Some(3.0));
        // recent + rating + most bookmarked (count 2 of max 2)
        assert_eq!(score_of(&results, 1, 2), Some(2.0 + 4.5 + 5.0));
        // recent + least bookmarked (count 1 of range 1..2)
        assert_eq!(score_of(&results, 1, 4), Some(2.0 + 2.0));
        assert_eq!(score_of(&results, 1, 3), None);
        assert_eq!(score_of(&results, 1, 5), None);
    }

    struct FakeSearch {
        healthy: bool,
        calls: RefCell<Vec<Vec<ListingId>>>,
    }

    impl SearchBackend for FakeSearch {
        fn health(&self) -> Result<(), String> {
            if self.healthy {
                Ok(())
            } else {
                Err("connection refused".to_string())
            }
        }

        fn related_listings(
            &self,
            seeds: &[ListingId],
            _limit: usize,
        ) -> Result<Vec<(ListingId, f64)>, String> {
            self.calls.borrow_mut().push(seeds.to_vec());
            Ok(vec![(ListingId(1), 0.5), (ListingId(2), 0.9), (ListingId(3), 0.7)])
        }
    }

    #[test]
    fn search_content_requires_a_healthy_backend() {
        let mut strategy = SearchContentRecommender::unconfigured();
        assert!(matches!(
            strategy.initiate(),
            Err(RecommendError::BackingServiceUnavailable { .. })
        ));

        let mut strategy = SearchContentRecommender::new(Box::new(FakeSearch {
            healthy: false,
            calls: RefCell::new(Vec::new()),
        }));
        let err = match strategy.initiate() {
            Ok(()) => panic!("unhealthy backend must fail initiate"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn search_content_skips_owned_and_hidden_listings() {
        let catalog = FakeCatalog {
            profiles: vec![profile(1, "UNCLASSIFIED")],
            listings: vec![listing(1, "UNCLASSIFIED"), listing(2, "UNCLASSIFIED"), listing(3, "SECRET")],
            bookmarks: vec![bookmark(1, 1)],
        };
        let mut strategy = SearchContentRecommender::new(Box::new(FakeSearch {
            healthy: true,
            calls: RefCell::new(Vec::new()),
        }));
        assert_eq!(strategy.initiate(), Ok(()));

        let results = run(&strategy, &catalog);
        assert_eq!(score_of(&results, 1, 1), None);
        assert_eq!(score_of(&results, 1, 2), Some(0.9));
        assert_eq!(score_of(&results, 1, 3), None);
    }

    /// Serves a canned search cluster on an ephemeral port; returns its base URL.
    ///
    /// Index `listings` answers with hits, index `broken` with a payload that
    /// lacks the hits array.
    pub(crate) fn serve_search_stub() -> String {
        let app = Router::new()
            .route("/_cluster/health", get(|| async { Json(json!({"status": "green"})) }))
            .route(
                "/listings/_search",
                post(|Json(query): Json<Value>| async move {
                    assert!(query["query"]["more_like_this"]["like"].is_array());
                    Json(json!({
                        "hits": {
                            "hits": [
                                {"_id": "2", "_score": 2.5},
                                {"_id": "1", "_score": 9.0},
                                {"_id": "3"},
                                {"_id": "not-a-number", "_score": 4.0}
                            ]
                        }
                    }))
                }),
            )
            .route("/broken/_search", post(|| async { Json(json!({"hits": {"total": {"value": 3}}})) }));

        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) => panic!("stub listener should bind: {err}"),
        };
        if let Err(err) = listener.set_nonblocking(true) {
            panic!("stub listener should be non-blocking: {err}");
        }
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => panic!("stub listener should have an address: {err}"),
        };

        thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => panic!("stub runtime should build: {err}"),
            };
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => panic!("stub listener should convert: {err}"),
                };
                if let Err(err) = axum::serve(listener, app).await {
                    panic!("stub server stopped: {err}");
                }
            });
        });

        format!("http://{addr}/")
    }

    #[test]
    fn http_backend_reads_health_and_hits() {
        let backend = HttpSearchBackend::new(&serve_search_stub(), "listings");
        assert_eq!(backend.health(), Ok(()));
        assert_eq!(backend.related_listings(&[], 10), Ok(Vec::new()));
        assert_eq!(
            backend.related_listings(&[ListingId(1)], 10),
            Ok(vec![(ListingId(2), 2.5), (ListingId(1), 9.0), (ListingId(3), 1.0)])
        );
    }

    #[test]
    fn http_backend_rejects_payload_without_hits() {
        let backend = HttpSearchBackend::new(&serve_search_stub(), "broken");
        assert_eq!(backend.health(), Ok(()));
        match backend.related_listings(&[ListingId(1)], 10) {
            Ok(hits) => panic!("malformed payload must not read as empty: {hits:?}"),
            Err(reason) => assert!(reason.contains("no hits array"), "reason: {reason}"),
        }

        let unreachable = HttpSearchBackend::new("http://127.0.0.1:9", "listings");
        assert!(unreachable.health().is_err());
    }

    #[test]
    fn search_content_scores_through_http_backend() {
        let catalog = FakeCatalog {
            profiles: vec![profile(1, "UNCLASSIFIED")],
            listings: (1..=3).map(|id| listing(id, "UNCLASSIFIED")).collect(),
            bookmarks: vec![bookmark(1, 1)],
        };
        let mut strategy = SearchContentRecommender::new(Box::new(HttpSearchBackend::new(
            &serve_search_stub(),
            "listings",
        )));
        assert_eq!(strategy.initiate(), Ok(()));

        let results = run(&strategy, &catalog);
        assert_eq!(score_of(&results, 1, 2), Some(2.5));
        assert_eq!(score_of(&results, 1, 3), Some(1.0));
        assert_eq!(score_of(&results, 1, 1), None);
    }

    #[test]
    fn graph_traversal_scores_co_bookmarked_listings() {
        let catalog = FakeCatalog {
            profiles: vec![profile(1, "UNCLASSIFIED"), profile(2, "UNCLASSIFIED"), profile(3, "UNCLASSIFIED")],
            listings: (1..=4).map(|id| listing(id, "UNCLASSIFIED")).collect(),
            bookmarks: vec![
                bookmark(1, 1),
                bookmark(2, 1),
                bookmark(2, 2),
                bookmark(3, 1),
                bookmark(3, 2),
                bookmark(3, 3),
            ],
        };

        let results = run(&GraphCollaborativeRecommender, &catalog);
        assert_eq!(score_of(&results, 1, 2), Some(2.0));
        assert_eq!(score_of(&results, 1, 3), Some(1.0));
        assert_eq!(score_of(&results, 1, 1), None);
        assert_eq!(score_of(&results, 1, 4), None);
    }

    #[test]
    fn directory_resolves_registered_names_only() {
        let directory = RecommenderDirectory::new(EngineConfig::default());
        assert_eq!(
            directory.names(),
            vec!["custom", "elasticsearch_content_base", "graph_collaborative_filtering", "sample_data"]
        );
        match directory.create("custom") {
            Ok(strategy) => assert_eq!(strategy.friendly_name(), "Custom Hybrid"),
            Err(err) => panic!("custom should resolve: {err}"),
        }
        match directory.create("surprise") {
            Ok(_) => panic!("unknown engine must not resolve"),
            Err(err) => assert_eq!(err, RecommendError::EngineNotFound("surprise".to_string())),
        }
    }
}
