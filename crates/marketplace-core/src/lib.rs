//! Access-control and recommendation engines for the listing marketplace.
//!
//! The crate is storage-agnostic: catalog reads and recommendation writes go
//! through the [`Catalog`] and [`RecommendationSink`] traits so the SQLite
//! store, the API facade and tests can all drive the same engines.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod access;
mod anonymize;
mod marking;
mod merge;
mod permissions;
mod policy;
mod recommend;
mod runner;
mod strategies;

pub use access::{
    filter_accessible, future_has_access, future_has_access_json, has_access,
    has_access_json_updated, has_access_updated, AccessDenial, AccessGrant, AccessProfile,
    Evaluator, EvaluationMode,
};
pub use anonymize::{AnonymizationPolicy, UserIdentity};
pub use marking::{tokenize, validate_marking, ClassificationLevel, Token};
pub use merge::{
    ProfileRecommendations, RecommendationMerger, StrategyRecommendations, DEFAULT_TOP_N,
};
pub use permissions::{
    check_notification_permission, permission_rule, NotificationAction, NotificationType,
    PermissionContext, PermissionDenied, PermissionRule, Role,
};
pub use policy::{
    default_policy, AccessPolicy, DisseminationControl, GroupRule, PolicyError,
    SuperCountryOverride, DEFAULT_POLICY_YAML,
};
pub use recommend::{map_numbers, RecommenderResultSet, ScoreMode, UserScores};
pub use runner::{
    EngineConfig, PersistSummary, RecommendationSink, RecommenderRunner, RunReport,
    StrategyFailure, StrategyOutcome, DEFAULT_BATCH_SIZE, DEFAULT_SEARCH_INDEX,
};
pub use strategies::{
    CustomHybridRecommender, GraphCollaborativeRecommender, HttpSearchBackend, Recommender,
    RecommenderDirectory, SampleDataRecommender, SearchBackend, SearchContentRecommender,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ProfileId(pub i64);

impl Display for ProfileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ListingId(pub i64);

impl Display for ListingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    InProgress,
    Pending,
    PendingDeletion,
    Rejected,
    Approved,
    Deleted,
}

impl ApprovalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Pending => "PENDING",
            Self::PendingDeletion => "PENDING_DELETION",
            Self::Rejected => "REJECTED",
            Self::Approved => "APPROVED",
            Self::Deleted => "DELETED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(Self::InProgress),
            "PENDING" => Some(Self::Pending),
            "PENDING_DELETION" => Some(Self::PendingDeletion),
            "REJECTED" => Some(Self::Rejected),
            "APPROVED" => Some(Self::Approved),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Profile row as the engines see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub profile_id: ProfileId,
    pub username: String,
    pub access: AccessProfile,
    /// Per-profile anonymization flag; `None` defers to the policy default.
    pub anonymize_identifiable_data: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingSnapshot {
    pub listing_id: ListingId,
    pub title: String,
    pub security_marking: Option<String>,
    pub is_featured: bool,
    pub is_enabled: bool,
    pub is_deleted: bool,
    pub approval_status: ApprovalStatus,
    /// Seconds since the unix epoch; `None` until the listing is approved.
    pub approved_at: Option<i64>,
    pub avg_rate: f64,
    pub total_reviews: u32,
}

impl ListingSnapshot {
    /// Approved, enabled and not deleted.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved && self.is_enabled && !self.is_deleted
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookmarkSnapshot {
    pub profile_id: ProfileId,
    pub listing_id: ListingId,
}

/// Read side of the marketplace that recommender strategies score against.
pub trait Catalog {
    /// # Errors
    /// Returns an error when the backing store cannot be read.
    fn profiles(&self) -> Result<Vec<ProfileSnapshot>, RecommendError>;

    /// # Errors
    /// Returns an error when the backing store cannot be read.
    fn listings(&self) -> Result<Vec<ListingSnapshot>, RecommendError>;

    /// # Errors
    /// Returns an error when the backing store cannot be read.
    fn bookmarks(&self) -> Result<Vec<BookmarkSnapshot>, RecommendError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RecommendError {
    #[error("Recommender Engine Not Found: {0}")]
    EngineNotFound(String),
    #[error("backing service unavailable for {engine}: {reason}")]
    BackingServiceUnavailable { engine: String, reason: String },
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}
