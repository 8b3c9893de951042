use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use marketplace_core::{
    check_notification_permission, AccessProfile, AccessPolicy, ApprovalStatus, BookmarkSnapshot,
    EngineConfig, EvaluationMode, Evaluator, ListingId, ListingSnapshot, NotificationAction,
    NotificationType, PermissionContext, ProfileId, ProfileRecommendations, ProfileSnapshot,
    RecommenderDirectory, RecommenderRunner, Role, RunReport, Token, UserIdentity,
};
use marketplace_store_sqlite::{NewListing, NewProfile, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddProfileRequest {
    pub username: String,
    pub access: AccessProfile,
    #[serde(default)]
    pub anonymize_identifiable_data: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddListingRequest {
    pub title: String,
    pub security_marking: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub approval_status: ApprovalStatus,
    pub approved_at: Option<i64>,
    #[serde(default)]
    pub avg_rate: f64,
    #[serde(default)]
    pub total_reviews: u32,
}

fn default_true() -> bool {
    true
}

/// Access check with the profile still in its serialized JSON form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessCheckRequest {
    pub profile_json: String,
    pub marking: Option<String>,
    #[serde(default)]
    pub mode: EvaluationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessCheckResult {
    pub allowed: bool,
    pub mode: EvaluationMode,
    pub marking_valid: bool,
    pub policy_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenizeResult {
    pub marking: String,
    pub valid: bool,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPermissionRequest {
    pub role: Role,
    pub action: NotificationAction,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub owns_listing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPermissionResult {
    pub allowed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedListing {
    pub listing_id: ListingId,
    pub title: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationView {
    pub profile_id: ProfileId,
    pub ranked: Vec<RankedListing>,
    pub strategies: Option<ProfileRecommendations>,
}

#[derive(Debug, Clone)]
pub struct MarketplaceApi {
    db_path: PathBuf,
    policy: Arc<AccessPolicy>,
    engine: EngineConfig,
}

impl MarketplaceApi {
    /// Facade over the database at `db_path` using the embedded access policy.
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            policy: Arc::new(marketplace_core::default_policy().clone()),
            engine: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    #[must_use]
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    #[must_use]
    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the username is taken or persistence fails.
    pub fn add_profile(&self, input: AddProfileRequest) -> Result<ProfileSnapshot> {
        let mut store = self.open_migrated_store()?;
        let profile_id = store.add_profile(&NewProfile {
            username: input.username,
            access: input.access,
            anonymize_identifiable_data: input.anonymize_identifiable_data,
        })?;
        load_profile(&store, profile_id)
    }

    /// Store a listing. Markings are stored as given; invalid ones are logged
    /// and will deny every viewer.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn add_listing(&self, input: AddListingRequest) -> Result<ListingSnapshot> {
        if !self.policy.validate_marking(input.security_marking.as_deref()) {
            tracing::warn!(title = %input.title, "listing stored with an invalid security marking");
        }

        let mut store = self.open_migrated_store()?;
        let listing_id = store.add_listing(&NewListing {
            title: input.title,
            security_marking: input.security_marking,
            is_featured: input.is_featured,
            is_enabled: input.is_enabled,
            is_deleted: input.is_deleted,
            approval_status: input.approval_status,
            approved_at: input.approved_at,
            avg_rate: input.avg_rate,
            total_reviews: input.total_reviews,
        })?;
        store.get_listing(listing_id)?.ok_or_else(|| anyhow!("listing {listing_id} not found"))
    }

    /// # Errors
    /// Returns an error when the profile or listing does not exist.
    pub fn add_bookmark(&self, profile_id: ProfileId, listing_id: ListingId) -> Result<BookmarkSnapshot> {
        let mut store = self.open_migrated_store()?;
        store.add_bookmark(profile_id, listing_id)?;
        Ok(BookmarkSnapshot { profile_id, listing_id })
    }

    /// Evaluate a marking for a serialized access profile.
    ///
    /// Only the boolean outcome is returned; the denial reason is logged.
    #[must_use]
    pub fn check_access(&self, input: &AccessCheckRequest) -> AccessCheckResult {
        let evaluator = Evaluator::new(&self.policy, input.mode);
        let outcome = AccessProfile::from_json(&input.profile_json)
            .and_then(|profile| evaluator.evaluate(&profile, input.marking.as_deref()));

        match &outcome {
            Ok(grant) => tracing::debug!(mode = input.mode.as_str(), ?grant, "access granted"),
            Err(denial) => {
                tracing::debug!(mode = input.mode.as_str(), reason = %denial, "access denied");
            }
        }

        AccessCheckResult {
            allowed: outcome.is_ok(),
            mode: input.mode,
            marking_valid: self.policy.validate_marking(input.marking.as_deref()),
            policy_version: self.policy.version.clone(),
        }
    }

    #[must_use]
    pub fn tokenize(&self, marking: &str) -> TokenizeResult {
        TokenizeResult {
            marking: marking.to_string(),
            valid: self.policy.validate_marking(Some(marking)),
            tokens: self.policy.tokenize(marking),
        }
    }

    #[must_use]
    pub fn notification_permission(
        &self,
        input: &NotificationPermissionRequest,
    ) -> NotificationPermissionResult {
        match check_notification_permission(
            input.role,
            input.action,
            input.notification_type,
            PermissionContext { owns_listing: input.owns_listing },
        ) {
            Ok(()) => NotificationPermissionResult { allowed: true, reason: None },
            Err(denied) => NotificationPermissionResult { allowed: false, reason: Some(denied.0) },
        }
    }

    /// Live listings the profile may see, in id order.
    ///
    /// # Errors
    /// Returns an error when the profile does not exist or the store cannot be read.
    pub fn visible_listings(&self, profile_id: ProfileId) -> Result<Vec<ListingSnapshot>> {
        let store = self.open_migrated_store()?;
        let profile = load_profile(&store, profile_id)?;
        let listings = store.list_listings()?;
        Ok(Evaluator::updated(&self.policy)
            .filter(&profile.access, listings, |listing: &ListingSnapshot| {
                listing.security_marking.as_deref()
            })
            .filter(ListingSnapshot::is_live)
            .collect())
    }

    /// Run the named recommender engines and persist the merged result.
    ///
    /// # Errors
    /// Returns an error for an unknown engine name (before any work) or when
    /// persistence fails. Individual engine failures are listed in the report.
    pub fn run_recommendations(&self, engines: &[String]) -> Result<RunReport> {
        let catalog = self.open_migrated_store()?;
        let mut sink = self.open_store()?;
        let directory = RecommenderDirectory::new(self.engine.clone());
        let runner = RecommenderRunner::new(&directory, Evaluator::updated(&self.policy));

        tracing::info!(engines = ?engines, "starting recommendation run");
        runner.run(engines, &catalog, &mut sink).map_err(|err| anyhow!(err))
    }

    /// Stored recommendations for a profile, combined by strategy weight and
    /// re-filtered against the profile's current access.
    ///
    /// # Errors
    /// Returns an error when the profile does not exist or the store cannot be read.
    pub fn recommendations_for(&self, profile_id: ProfileId) -> Result<RecommendationView> {
        let store = self.open_migrated_store()?;
        let profile = load_profile(&store, profile_id)?;
        let strategies = store.get_recommendations(profile_id)?;
        let evaluator = Evaluator::updated(&self.policy);

        let mut ranked = Vec::new();
        if let Some(blob) = &strategies {
            for (listing_id, score) in blob.weighted_ranking() {
                let Some(listing) = store.get_listing(listing_id)? else {
                    continue;
                };
                if listing.is_live()
                    && evaluator.permits(&profile.access, listing.security_marking.as_deref())
                {
                    ranked.push(RankedListing { listing_id, title: listing.title, score });
                }
            }
        }

        Ok(RecommendationView { profile_id, ranked, strategies })
    }

    /// Prepare a peer notification for `viewer`.
    ///
    /// Internal bookmark ids are always stripped from the peer; the peer
    /// username is replaced when the viewer must not see identifiable data.
    ///
    /// # Errors
    /// Returns an error when the viewer profile does not exist.
    pub fn present_notification(&self, viewer: ProfileId, notification: Value) -> Result<Value> {
        let store = self.open_migrated_store()?;
        let viewer = load_profile(&store, viewer)?;
        Ok(anonymize_peer_notification(&self.policy, &viewer, notification))
    }
}

fn load_profile(store: &SqliteStore, profile_id: ProfileId) -> Result<ProfileSnapshot> {
    store.get_profile(profile_id)?.ok_or_else(|| anyhow!("profile {profile_id} not found"))
}

/// Strip and anonymize the `peer` object of a serialized notification.
#[must_use]
pub fn anonymize_peer_notification(
    policy: &AccessPolicy,
    viewer: &ProfileSnapshot,
    mut notification: Value,
) -> Value {
    let anonymize = policy.should_anonymize(&UserIdentity {
        access: &viewer.access,
        anonymize_identifiable_data: viewer.anonymize_identifiable_data,
    });

    if let Some(peer) = notification.get_mut("peer").and_then(Value::as_object_mut) {
        peer.remove("_bookmark_listing_ids");
        if anonymize {
            if let Some(user) = peer.get_mut("user").and_then(Value::as_object_mut) {
                if user.contains_key("username") {
                    user.insert(
                        "username".to_string(),
                        Value::String(policy.anonymize("username").to_string()),
                    );
                }
            }
        }
    }

    notification
}

#[cfg(test)]
mod tests {
    use marketplace_core::default_policy;
    use serde_json::json;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("marketplace-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn cleanup(db_path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
    }

    fn access(clearances: &[&str], country: &str) -> AccessProfile {
        AccessProfile {
            clearances: clearances.iter().map(|value| (*value).to_string()).collect(),
            country: Some(country.to_string()),
            ..AccessProfile::default()
        }
    }

    fn listing(title: &str, marking: &str, approved_at: i64) -> AddListingRequest {
        AddListingRequest {
            title: title.to_string(),
            security_marking: Some(marking.to_string()),
            is_featured: false,
            is_enabled: true,
            is_deleted: false,
            approval_status: ApprovalStatus::Approved,
            approved_at: Some(approved_at),
            avg_rate: 0.0,
            total_reviews: 0,
        }
    }

    // Test IDs: TAPI-001
    #[test]
    fn visible_listings_respect_markings_and_state() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = MarketplaceApi::new(db_path.clone());

        let profile = api.add_profile(AddProfileRequest {
            username: "jones".to_string(),
            access: access(&["UNCLASSIFIED"], "USA"),
            anonymize_identifiable_data: None,
        })?;
        let open = api.add_listing(listing("Open", "UNCLASSIFIED", 1))?;
        api.add_listing(listing("Secret", "SECRET", 2))?;
        let mut disabled = listing("Disabled", "UNCLASSIFIED", 3);
        disabled.is_enabled = false;
        api.add_listing(disabled)?;

        let visible = api.visible_listings(profile.profile_id)?;
        assert_eq!(visible.iter().map(|listing| listing.listing_id).collect::<Vec<_>>(), vec![open.listing_id]);

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-002
    #[test]
    fn run_then_show_recommendations() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = MarketplaceApi::new(db_path.clone());

        let reader = api.add_profile(AddProfileRequest {
            username: "reader".to_string(),
            access: access(&["UNCLASSIFIED"], "USA"),
            anonymize_identifiable_data: None,
        })?;
        let peer = api.add_profile(AddProfileRequest {
            username: "peer".to_string(),
            access: access(&["UNCLASSIFIED"], "USA"),
            anonymize_identifiable_data: None,
        })?;
        let mut featured = listing("Featured", "UNCLASSIFIED", 5);
        featured.is_featured = true;
        let featured = api.add_listing(featured)?;
        let plain = api.add_listing(listing("Plain", "UNCLASSIFIED", 1))?;
        api.add_listing(listing("Hidden", "SECRET", 9))?;
        api.add_bookmark(peer.profile_id, plain.listing_id)?;

        let report = api.run_recommendations(&["custom".to_string(), "sample_data".to_string()])?;
        assert!(report.failed.is_empty());
        assert_eq!(report.persisted.profiles_written, 2);

        let view = api.recommendations_for(reader.profile_id)?;
        let ids = view.ranked.iter().map(|entry| entry.listing_id).collect::<Vec<_>>();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&featured.listing_id));
        assert!(ids.contains(&plain.listing_id));
        let Some(strategies) = view.strategies else {
            return Err(anyhow!("strategies should be stored"));
        };
        assert!(strategies.strategies.contains_key("Custom Hybrid"));
        assert!(strategies.strategies.contains_key("Sample Data"));

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn unknown_engine_is_rejected_without_writes() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = MarketplaceApi::new(db_path.clone());
        let profile = api.add_profile(AddProfileRequest {
            username: "reader".to_string(),
            access: access(&["UNCLASSIFIED"], "USA"),
            anonymize_identifiable_data: None,
        })?;

        let err = match api.run_recommendations(&["custom".to_string(), "nope".to_string()]) {
            Ok(_) => return Err(anyhow!("unknown engine must fail")),
            Err(err) => err,
        };
        assert!(err.to_string().contains("Recommender Engine Not Found: nope"));
        assert!(api.recommendations_for(profile.profile_id)?.strategies.is_none());

        cleanup(&db_path);
        Ok(())
    }

    #[test]
    fn check_access_reports_boolean_outcome() {
        let api = MarketplaceApi::new(unique_temp_db_path());
        let profile_json = r#"{"clearances": ["UNCLASSIFIED", "SECRET"], "formal_accesses": [], "visas": ["FVEY"], "country": "GBR"}"#;

        let allowed = api.check_access(&AccessCheckRequest {
            profile_json: profile_json.to_string(),
            marking: Some("SECRET//FVEY".to_string()),
            mode: EvaluationMode::Updated,
        });
        assert!(allowed.allowed);
        assert!(allowed.marking_valid);
        assert_eq!(allowed.policy_version, "access-policy.v1");

        let denied = api.check_access(&AccessCheckRequest {
            profile_json: "{not json".to_string(),
            marking: Some("UNCLASSIFIED".to_string()),
            mode: EvaluationMode::Legacy,
        });
        assert!(!denied.allowed);
    }

    #[test]
    fn peer_notification_is_stripped_and_anonymized() {
        let policy = default_policy();
        let notification = json!({
            "id": 7,
            "message": "shared a folder",
            "peer": {
                "user": {"username": "bigbrother"},
                "folder_name": "Tools",
                "_bookmark_listing_ids": [1, 2]
            }
        });
        let viewer = |country: &str| ProfileSnapshot {
            profile_id: ProfileId(1),
            username: "viewer".to_string(),
            access: access(&["UNCLASSIFIED"], country),
            anonymize_identifiable_data: None,
        };

        let anonymized = anonymize_peer_notification(policy, &viewer("NONSUPER"), notification.clone());
        assert_eq!(anonymized["peer"]["user"]["username"], "Anonymous");
        assert!(anonymized["peer"].get("_bookmark_listing_ids").is_none());

        let raw = anonymize_peer_notification(policy, &viewer("SUPER"), notification);
        assert_eq!(raw["peer"]["user"]["username"], "bigbrother");
        assert!(raw["peer"].get("_bookmark_listing_ids").is_none());
    }

    #[test]
    fn notification_permission_exposes_reason() {
        let api = MarketplaceApi::new(unique_temp_db_path());
        let result = api.notification_permission(&NotificationPermissionRequest {
            role: Role::User,
            action: NotificationAction::Create,
            notification_type: NotificationType::Agency,
            owns_listing: false,
        });
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("Only org stewards can create agency notifications"));
    }
}
