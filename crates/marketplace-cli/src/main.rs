use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use marketplace_api::{
    AccessCheckRequest, AddListingRequest, AddProfileRequest, MarketplaceApi,
    NotificationPermissionRequest,
};
use marketplace_core::{
    AccessPolicy, AccessProfile, ApprovalStatus, EngineConfig, EvaluationMode, ListingId,
    NotificationAction, NotificationType, ProfileId, Role, DEFAULT_BATCH_SIZE,
    DEFAULT_SEARCH_INDEX, DEFAULT_TOP_N,
};
use marketplace_store_sqlite::SqliteStore;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "mkt")]
#[command(about = "Listing marketplace CLI")]
struct Cli {
    #[arg(long, default_value = "./marketplace.sqlite3")]
    db: PathBuf,

    /// YAML access policy replacing the embedded default.
    #[arg(long, env = "MARKETPLACE_POLICY")]
    policy: Option<PathBuf>,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Base URL of the search service used by content recommendations.
    #[arg(long, env = "MARKETPLACE_SEARCH_URL")]
    search_url: Option<String>,

    #[arg(long, default_value = DEFAULT_SEARCH_INDEX)]
    search_index: String,

    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    top_n: usize,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

impl EngineArgs {
    fn to_config(&self) -> EngineConfig {
        EngineConfig {
            top_n: self.top_n,
            batch_size: self.batch_size,
            search_service_url: self.search_url.clone(),
            search_index: self.search_index.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Profile {
        #[command(subcommand)]
        command: Box<ProfileCommand>,
    },
    Listing {
        #[command(subcommand)]
        command: Box<ListingCommand>,
    },
    Bookmark {
        #[command(subcommand)]
        command: Box<BookmarkCommand>,
    },
    Access {
        #[command(subcommand)]
        command: Box<AccessCommand>,
    },
    Notification {
        #[command(subcommand)]
        command: Box<NotificationCommand>,
    },
    Recommend {
        #[command(subcommand)]
        command: Box<RecommendCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    Add(ProfileAddArgs),
}

#[derive(Debug, Args)]
struct ProfileAddArgs {
    #[arg(long)]
    username: String,

    /// Access control document, e.g. `{"clearances": ["UNCLASSIFIED"], "country": "USA"}`.
    #[arg(long)]
    access_json: String,

    /// Per-profile anonymization override.
    #[arg(long)]
    anonymize: Option<bool>,
}

#[derive(Debug, Subcommand)]
enum ListingCommand {
    Add(ListingAddArgs),
    Visible(ProfileIdArgs),
}

#[derive(Debug, Args)]
struct ListingAddArgs {
    #[arg(long)]
    title: String,

    #[arg(long)]
    security_marking: Option<String>,

    #[arg(long, default_value_t = false)]
    featured: bool,

    #[arg(long, default_value_t = false)]
    disabled: bool,

    #[arg(long, value_enum, default_value_t = ApprovalStatusArg::Approved)]
    approval_status: ApprovalStatusArg,

    /// Approval time as unix seconds.
    #[arg(long)]
    approved_at: Option<i64>,

    #[arg(long, default_value_t = 0.0)]
    avg_rate: f64,

    #[arg(long, default_value_t = 0)]
    total_reviews: u32,
}

#[derive(Debug, Args)]
struct ProfileIdArgs {
    #[arg(long)]
    profile_id: i64,
}

#[derive(Debug, Subcommand)]
enum BookmarkCommand {
    Add(BookmarkAddArgs),
}

#[derive(Debug, Args)]
struct BookmarkAddArgs {
    #[arg(long)]
    profile_id: i64,

    #[arg(long)]
    listing_id: i64,
}

#[derive(Debug, Subcommand)]
enum AccessCommand {
    Check(AccessCheckArgs),
    Validate(MarkingArgs),
    Tokenize(MarkingArgs),
}

#[derive(Debug, Args)]
struct AccessCheckArgs {
    #[arg(long)]
    profile_json: String,

    #[arg(long)]
    marking: Option<String>,

    #[arg(long, value_enum, default_value_t = ModeArg::Updated)]
    mode: ModeArg,
}

#[derive(Debug, Args)]
struct MarkingArgs {
    #[arg(long)]
    marking: String,
}

#[derive(Debug, Subcommand)]
enum NotificationCommand {
    Check(NotificationCheckArgs),
    Present(NotificationPresentArgs),
}

#[derive(Debug, Args)]
struct NotificationCheckArgs {
    #[arg(long, value_enum)]
    role: RoleArg,

    #[arg(long, value_enum)]
    action: ActionArg,

    #[arg(long = "type", value_enum)]
    notification_type: NotificationTypeArg,

    #[arg(long, default_value_t = false)]
    owns_listing: bool,
}

#[derive(Debug, Args)]
struct NotificationPresentArgs {
    #[arg(long)]
    viewer_id: i64,

    #[arg(long)]
    notification_json: String,
}

#[derive(Debug, Subcommand)]
enum RecommendCommand {
    Run(RecommendRunArgs),
    Show(ProfileIdArgs),
}

#[derive(Debug, Args)]
struct RecommendRunArgs {
    /// Engines to run, in order. Earlier engines win on friendly-name clashes.
    #[arg(
        long = "engine",
        env = "RECOMMENDATION_ENGINE",
        value_delimiter = ',',
        default_value = "custom"
    )]
    engines: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Legacy,
    Updated,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    AppsMallSteward,
    OrgSteward,
    User,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum NotificationTypeArg {
    System,
    Agency,
    Listing,
    Peer,
    PeerBookmark,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ApprovalStatusArg {
    InProgress,
    Pending,
    PendingDeletion,
    Rejected,
    Approved,
    Deleted,
}

impl From<ModeArg> for EvaluationMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Legacy => Self::Legacy,
            ModeArg::Updated => Self::Updated,
        }
    }
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::AppsMallSteward => Self::AppsMallSteward,
            RoleArg::OrgSteward => Self::OrgSteward,
            RoleArg::User => Self::User,
        }
    }
}

impl From<ActionArg> for NotificationAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Create => Self::Create,
            ActionArg::Update => Self::Update,
            ActionArg::Delete => Self::Delete,
        }
    }
}

impl From<NotificationTypeArg> for NotificationType {
    fn from(value: NotificationTypeArg) -> Self {
        match value {
            NotificationTypeArg::System => Self::System,
            NotificationTypeArg::Agency => Self::Agency,
            NotificationTypeArg::Listing => Self::Listing,
            NotificationTypeArg::Peer => Self::Peer,
            NotificationTypeArg::PeerBookmark => Self::PeerBookmark,
        }
    }
}

impl From<ApprovalStatusArg> for ApprovalStatus {
    fn from(value: ApprovalStatusArg) -> Self {
        match value {
            ApprovalStatusArg::InProgress => Self::InProgress,
            ApprovalStatusArg::Pending => Self::Pending,
            ApprovalStatusArg::PendingDeletion => Self::PendingDeletion,
            ApprovalStatusArg::Rejected => Self::Rejected,
            ApprovalStatusArg::Approved => Self::Approved,
            ApprovalStatusArg::Deleted => Self::Deleted,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so stdout stays machine-readable JSON.
    let filter = EnvFilter::try_from_env("MARKETPLACE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn build_api(cli: &Cli) -> Result<MarketplaceApi> {
    let mut api = MarketplaceApi::new(cli.db.clone()).with_engine_config(cli.engine.to_config());
    if let Some(path) = cli.policy.as_ref() {
        let policy = AccessPolicy::from_yaml_path(path)
            .with_context(|| format!("failed to load access policy {}", path.display()))?;
        api = api.with_policy(policy);
    }
    Ok(api)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = build_api(&cli)?;
    match cli.command {
        Command::Db { command } => {
            let mut store = SqliteStore::open(&cli.db)?;
            run_db(*command, &mut store)
        }
        Command::Profile { command } => run_profile(*command, &api),
        Command::Listing { command } => run_listing(*command, &api),
        Command::Bookmark { command } => run_bookmark(*command, &api),
        Command::Access { command } => run_access(*command, &api),
        Command::Notification { command } => run_notification(*command, &api),
        Command::Recommend { command } => run_recommend(*command, &api),
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::Backup(args) => {
            store.migrate()?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }));
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_profile(command: ProfileCommand, api: &MarketplaceApi) -> Result<()> {
    match command {
        ProfileCommand::Add(args) => {
            let access: AccessProfile = serde_json::from_str(&args.access_json)
                .context("--access-json is not a valid access control document")?;
            let profile = api.add_profile(AddProfileRequest {
                username: args.username,
                access,
                anonymize_identifiable_data: args.anonymize,
            })?;
            emit_json(serde_json::to_value(&profile)?)
        }
    }
}

fn run_listing(command: ListingCommand, api: &MarketplaceApi) -> Result<()> {
    match command {
        ListingCommand::Add(args) => {
            let listing = api.add_listing(AddListingRequest {
                title: args.title,
                security_marking: args.security_marking,
                is_featured: args.featured,
                is_enabled: !args.disabled,
                is_deleted: false,
                approval_status: args.approval_status.into(),
                approved_at: args.approved_at,
                avg_rate: args.avg_rate,
                total_reviews: args.total_reviews,
            })?;
            emit_json(serde_json::to_value(&listing)?)
        }
        ListingCommand::Visible(args) => {
            let profile_id = ProfileId(args.profile_id);
            let listings = api.visible_listings(profile_id)?;
            emit_json(serde_json::json!({
                "profile_id": profile_id,
                "listings": listings
            }))
        }
    }
}

fn run_bookmark(command: BookmarkCommand, api: &MarketplaceApi) -> Result<()> {
    match command {
        BookmarkCommand::Add(args) => {
            let bookmark =
                api.add_bookmark(ProfileId(args.profile_id), ListingId(args.listing_id))?;
            emit_json(serde_json::to_value(bookmark)?)
        }
    }
}

fn run_access(command: AccessCommand, api: &MarketplaceApi) -> Result<()> {
    match command {
        AccessCommand::Check(args) => {
            let result = api.check_access(&AccessCheckRequest {
                profile_json: args.profile_json,
                marking: args.marking,
                mode: args.mode.into(),
            });
            emit_json(serde_json::to_value(&result)?)
        }
        AccessCommand::Validate(args) => {
            let valid = api.policy().validate_marking(Some(args.marking.as_str()));
            emit_json(serde_json::json!({
                "marking": args.marking,
                "valid": valid
            }))
        }
        AccessCommand::Tokenize(args) => emit_json(serde_json::to_value(api.tokenize(&args.marking))?),
    }
}

fn run_notification(command: NotificationCommand, api: &MarketplaceApi) -> Result<()> {
    match command {
        NotificationCommand::Check(args) => {
            let result = api.notification_permission(&NotificationPermissionRequest {
                role: args.role.into(),
                action: args.action.into(),
                notification_type: args.notification_type.into(),
                owns_listing: args.owns_listing,
            });
            emit_json(serde_json::to_value(&result)?)
        }
        NotificationCommand::Present(args) => {
            let notification: Value = serde_json::from_str(&args.notification_json)
                .context("--notification-json is not valid JSON")?;
            if !notification.is_object() {
                return Err(anyhow!("--notification-json must be a JSON object"));
            }
            emit_json(api.present_notification(ProfileId(args.viewer_id), notification)?)
        }
    }
}

fn run_recommend(command: RecommendCommand, api: &MarketplaceApi) -> Result<()> {
    match command {
        RecommendCommand::Run(args) => {
            let report = api.run_recommendations(&args.engines)?;
            emit_json(serde_json::to_value(&report)?)
        }
        RecommendCommand::Show(args) => {
            let view = api.recommendations_for(ProfileId(args.profile_id))?;
            emit_json(serde_json::to_value(&view)?)
        }
    }
}
