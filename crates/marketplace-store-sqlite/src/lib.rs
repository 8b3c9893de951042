use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use marketplace_core::{
    AccessProfile, ApprovalStatus, BookmarkSnapshot, Catalog, ListingId, ListingSnapshot,
    PersistSummary, ProfileId, ProfileRecommendations, ProfileSnapshot, RecommendError,
    RecommendationSink,
};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS profiles (
  profile_id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL UNIQUE,
  access_control_json TEXT NOT NULL,
  anonymize_identifiable_data INTEGER CHECK (anonymize_identifiable_data IN (0, 1)),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS listings (
  listing_id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT NOT NULL,
  security_marking TEXT,
  is_featured INTEGER NOT NULL DEFAULT 0 CHECK (is_featured IN (0, 1)),
  is_enabled INTEGER NOT NULL DEFAULT 1 CHECK (is_enabled IN (0, 1)),
  is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
  approval_status TEXT NOT NULL CHECK (approval_status IN
    ('IN_PROGRESS','PENDING','PENDING_DELETION','REJECTED','APPROVED','DELETED')),
  approved_at INTEGER,
  avg_rate REAL NOT NULL DEFAULT 0 CHECK (avg_rate >= 0 AND avg_rate <= 5),
  total_reviews INTEGER NOT NULL DEFAULT 0 CHECK (total_reviews >= 0),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookmark_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  profile_id INTEGER NOT NULL,
  listing_id INTEGER NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE(profile_id, listing_id),
  FOREIGN KEY (profile_id) REFERENCES profiles(profile_id) ON DELETE CASCADE,
  FOREIGN KEY (listing_id) REFERENCES listings(listing_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_listings_approved_at ON listings(approved_at);
CREATE INDEX IF NOT EXISTS idx_bookmark_entries_listing ON bookmark_entries(listing_id);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS recommendations (
  profile_id INTEGER PRIMARY KEY,
  recommendation_data TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (profile_id) REFERENCES profiles(profile_id) ON DELETE CASCADE
);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewProfile {
    pub username: String,
    pub access: AccessProfile,
    pub anonymize_identifiable_data: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewListing {
    pub title: String,
    pub security_marking: Option<String>,
    pub is_featured: bool,
    pub is_enabled: bool,
    pub is_deleted: bool,
    pub approval_status: ApprovalStatus,
    pub approved_at: Option<i64>,
    pub avg_rate: f64,
    pub total_reviews: u32,
}

impl NewListing {
    /// Approved, enabled listing with no ratings.
    #[must_use]
    pub fn approved(title: &str, security_marking: &str, approved_at: i64) -> Self {
        Self {
            title: title.to_string(),
            security_marking: Some(security_marking.to_string()),
            is_featured: false,
            is_enabled: true,
            is_deleted: false,
            approval_status: ApprovalStatus::Approved,
            approved_at: Some(approved_at),
            avg_rate: 0.0,
            total_reviews: 0,
        }
    }
}

impl SqliteStore {
    /// Open a SQLite-backed marketplace store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version < 1 {
            self.apply_migration(1, MIGRATION_001_SQL)?;
            version = 1;
        }
        if version < 2 {
            self.apply_migration(2, MIGRATION_002_SQL)?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration(&mut self, version: i64, sql: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .with_context(|| format!("failed to start migration v{version} transaction"))?;
        tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
        record_schema_version(&tx, version)?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        tracing::info!(version, "applied schema migration");
        Ok(())
    }

    /// # Errors
    /// Returns an error when the username is taken or the insert fails.
    pub fn add_profile(&mut self, profile: &NewProfile) -> Result<ProfileId> {
        let access_json =
            serde_json::to_string(&profile.access).context("failed to serialize access profile")?;
        self.conn
            .execute(
                "INSERT INTO profiles(username, access_control_json, anonymize_identifiable_data, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![profile.username, access_json, profile.anonymize_identifiable_data, now_rfc3339()?],
            )
            .with_context(|| format!("failed to insert profile {}", profile.username))?;
        Ok(ProfileId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the insert fails or violates a column check.
    pub fn add_listing(&mut self, listing: &NewListing) -> Result<ListingId> {
        self.conn
            .execute(
                "INSERT INTO listings(
                    title, security_marking, is_featured, is_enabled, is_deleted,
                    approval_status, approved_at, avg_rate, total_reviews, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    listing.title,
                    listing.security_marking,
                    listing.is_featured,
                    listing.is_enabled,
                    listing.is_deleted,
                    listing.approval_status.as_str(),
                    listing.approved_at,
                    listing.avg_rate,
                    listing.total_reviews,
                    now_rfc3339()?,
                ],
            )
            .with_context(|| format!("failed to insert listing {}", listing.title))?;
        Ok(ListingId(self.conn.last_insert_rowid()))
    }

    /// Bookmark a listing for a profile. Re-adding an existing bookmark is a no-op.
    ///
    /// # Errors
    /// Returns an error when the profile or listing does not exist.
    pub fn add_bookmark(&mut self, profile_id: ProfileId, listing_id: ListingId) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO bookmark_entries(profile_id, listing_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![profile_id.0, listing_id.0, now_rfc3339()?],
            )
            .with_context(|| format!("failed to bookmark listing {listing_id} for profile {profile_id}"))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_listing(&mut self, listing_id: ListingId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM listings WHERE listing_id = ?1", params![listing_id.0])
            .with_context(|| format!("failed to delete listing {listing_id}"))?;
        Ok(removed > 0)
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_profile(&self, profile_id: ProfileId) -> Result<Option<ProfileSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT profile_id, username, access_control_json, anonymize_identifiable_data
                 FROM profiles WHERE profile_id = ?1",
                params![profile_id.0],
                profile_row,
            )
            .optional()
            .with_context(|| format!("failed to read profile {profile_id}"))?;
        row.map(ProfileRow::into_snapshot).transpose()
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_profiles(&self) -> Result<Vec<ProfileSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT profile_id, username, access_control_json, anonymize_identifiable_data
             FROM profiles ORDER BY profile_id ASC",
        )?;
        let rows = stmt.query_map([], profile_row)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?.into_snapshot()?);
        }
        Ok(profiles)
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_listing(&self, listing_id: ListingId) -> Result<Option<ListingSnapshot>> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_LISTINGS_SQL} WHERE listing_id = ?1"),
                params![listing_id.0],
                listing_row,
            )
            .optional()
            .with_context(|| format!("failed to read listing {listing_id}"))?;
        row.map(ListingRow::into_snapshot).transpose()
    }

    /// All listings in id order, including disabled and deleted ones.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_listings(&self) -> Result<Vec<ListingSnapshot>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_LISTINGS_SQL} ORDER BY listing_id ASC"))?;
        let rows = stmt.query_map([], listing_row)?;

        let mut listings = Vec::new();
        for row in rows {
            listings.push(row?.into_snapshot()?);
        }
        Ok(listings)
    }

    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_bookmarks(&self) -> Result<Vec<BookmarkSnapshot>> {
        let mut stmt = self
            .conn
            .prepare("SELECT profile_id, listing_id FROM bookmark_entries ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(BookmarkSnapshot {
                profile_id: ProfileId(row.get(0)?),
                listing_id: ListingId(row.get(1)?),
            })
        })?;

        let mut bookmarks = Vec::new();
        for row in rows {
            bookmarks.push(row?);
        }
        Ok(bookmarks)
    }

    /// Stored recommendation blob for one profile.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or the blob is malformed.
    pub fn get_recommendations(&self, profile_id: ProfileId) -> Result<Option<ProfileRecommendations>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT recommendation_data FROM recommendations WHERE profile_id = ?1",
                params![profile_id.0],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read recommendations for profile {profile_id}"))?;

        raw.map(|raw| {
            serde_json::from_str(&raw)
                .with_context(|| format!("malformed recommendation blob for profile {profile_id}"))
        })
        .transpose()
    }

    /// Replace stored blobs in transactions of at most `batch_size` profiles.
    ///
    /// Profiles that no longer exist are skipped. Listings that no longer
    /// exist or are marked deleted are pruned from each blob before writing.
    ///
    /// # Errors
    /// Returns an error when a batch cannot be written; earlier batches stay committed.
    pub fn replace_recommendations(
        &mut self,
        profiles: &BTreeMap<ProfileId, ProfileRecommendations>,
        batch_size: usize,
    ) -> Result<PersistSummary> {
        let mut summary = PersistSummary::default();
        let entries = profiles.iter().collect::<Vec<_>>();

        for batch in entries.chunks(batch_size.max(1)) {
            let tx = self.conn.transaction().context("failed to start recommendation batch")?;
            let live_listings = resolvable_listing_ids(&tx)?;
            let updated_at = now_rfc3339()?;

            for (profile_id, blob) in batch {
                if !profile_exists(&tx, **profile_id)? {
                    tracing::debug!(%profile_id, "skipping recommendations for missing profile");
                    summary.profiles_skipped += 1;
                    continue;
                }

                let mut blob = (*blob).clone();
                summary.listings_pruned +=
                    blob.retain_listings(|listing_id| live_listings.contains(&listing_id));
                let data = serde_json::to_string(&blob)
                    .context("failed to serialize recommendation blob")?;

                tx.execute(
                    "INSERT INTO recommendations(profile_id, recommendation_data, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(profile_id) DO UPDATE SET
                       recommendation_data = excluded.recommendation_data,
                       updated_at = excluded.updated_at",
                    params![profile_id.0, data, updated_at],
                )
                .with_context(|| format!("failed to store recommendations for profile {profile_id}"))?;
                summary.profiles_written += 1;
            }

            tx.commit().context("failed to commit recommendation batch")?;
            summary.batches += 1;
            tracing::debug!(batch = summary.batches, size = batch.len(), "committed recommendation batch");
        }

        Ok(summary)
    }

    /// Copy the database to `out_file` using the online backup API.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

impl Catalog for SqliteStore {
    fn profiles(&self) -> Result<Vec<ProfileSnapshot>, RecommendError> {
        self.list_profiles().map_err(|err| RecommendError::Catalog(format!("{err:#}")))
    }

    fn listings(&self) -> Result<Vec<ListingSnapshot>, RecommendError> {
        self.list_listings().map_err(|err| RecommendError::Catalog(format!("{err:#}")))
    }

    fn bookmarks(&self) -> Result<Vec<BookmarkSnapshot>, RecommendError> {
        self.list_bookmarks().map_err(|err| RecommendError::Catalog(format!("{err:#}")))
    }
}

impl RecommendationSink for SqliteStore {
    fn save_recommendations(
        &mut self,
        profiles: &BTreeMap<ProfileId, ProfileRecommendations>,
        batch_size: usize,
    ) -> Result<PersistSummary, RecommendError> {
        self.replace_recommendations(profiles, batch_size)
            .map_err(|err| RecommendError::Persistence(format!("{err:#}")))
    }
}

const SELECT_LISTINGS_SQL: &str = "SELECT
    listing_id, title, security_marking, is_featured, is_enabled, is_deleted,
    approval_status, approved_at, avg_rate, total_reviews
 FROM listings";

struct ProfileRow {
    profile_id: i64,
    username: String,
    access_control_json: String,
    anonymize_identifiable_data: Option<bool>,
}

impl ProfileRow {
    fn into_snapshot(self) -> Result<ProfileSnapshot> {
        let access: AccessProfile = serde_json::from_str(&self.access_control_json)
            .with_context(|| format!("malformed access_control_json for profile {}", self.profile_id))?;
        Ok(ProfileSnapshot {
            profile_id: ProfileId(self.profile_id),
            username: self.username,
            access,
            anonymize_identifiable_data: self.anonymize_identifiable_data,
        })
    }
}

fn profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        profile_id: row.get(0)?,
        username: row.get(1)?,
        access_control_json: row.get(2)?,
        anonymize_identifiable_data: row.get(3)?,
    })
}

struct ListingRow {
    listing_id: i64,
    title: String,
    security_marking: Option<String>,
    is_featured: bool,
    is_enabled: bool,
    is_deleted: bool,
    approval_status: String,
    approved_at: Option<i64>,
    avg_rate: f64,
    total_reviews: u32,
}

impl ListingRow {
    fn into_snapshot(self) -> Result<ListingSnapshot> {
        let approval_status = ApprovalStatus::parse(&self.approval_status)
            .ok_or_else(|| anyhow!("unknown approval_status: {}", self.approval_status))?;
        Ok(ListingSnapshot {
            listing_id: ListingId(self.listing_id),
            title: self.title,
            security_marking: self.security_marking,
            is_featured: self.is_featured,
            is_enabled: self.is_enabled,
            is_deleted: self.is_deleted,
            approval_status,
            approved_at: self.approved_at,
            avg_rate: self.avg_rate,
            total_reviews: self.total_reviews,
        })
    }
}

fn listing_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        listing_id: row.get(0)?,
        title: row.get(1)?,
        security_marking: row.get(2)?,
        is_featured: row.get(3)?,
        is_enabled: row.get(4)?,
        is_deleted: row.get(5)?,
        approval_status: row.get(6)?,
        approved_at: row.get(7)?,
        avg_rate: row.get(8)?,
        total_reviews: row.get(9)?,
    })
}

fn resolvable_listing_ids(tx: &Transaction<'_>) -> Result<BTreeSet<ListingId>> {
    let mut stmt = tx
        .prepare("SELECT listing_id FROM listings WHERE is_deleted = 0")
        .context("failed to prepare listing lookup")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

    let mut ids = BTreeSet::new();
    for row in rows {
        ids.insert(ListingId(row?));
    }
    Ok(ids)
}

fn profile_exists(tx: &Transaction<'_>, profile_id: ProfileId) -> Result<bool> {
    let exists = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM profiles WHERE profile_id = ?1)",
            params![profile_id.0],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check profile {profile_id}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
