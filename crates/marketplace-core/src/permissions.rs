//! Notification permission table keyed by (role, action, notification type).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    AppsMallSteward,
    OrgSteward,
    User,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::AppsMallSteward, Self::OrgSteward, Self::User];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Create,
    Update,
    Delete,
}

impl NotificationAction {
    pub const ALL: [Self; 3] = [Self::Create, Self::Update, Self::Delete];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    System,
    Agency,
    Listing,
    Peer,
    PeerBookmark,
}

impl NotificationType {
    pub const ALL: [Self; 5] =
        [Self::System, Self::Agency, Self::Listing, Self::Peer, Self::PeerBookmark];
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PermissionRule {
    Allow,
    Deny(&'static str),
    /// Allowed only for owners of the target listing.
    RequireListingOwnership,
    /// No rule defined for the cell.
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionContext {
    pub owns_listing: bool,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("permission denied: {0}")]
pub struct PermissionDenied(pub String);

const ONLY_STEWARDS_CREATE_SYSTEM: &str = "Only app mall stewards can create system notifications";
const ONLY_STEWARDS_UPDATE_SYSTEM: &str = "Only app mall stewards can update system notifications";
const ONLY_STEWARDS_DELETE_SYSTEM: &str = "Only app mall stewards can delete system notifications";
const ONLY_ORG_STEWARDS_AGENCY: &str = "Only org stewards can create agency notifications";
const NOT_LISTING_OWNER: &str = "Cannot create a notification for a listing you do not own";
const UNKNOWN_PERMISSIONS: &str = "Unknown Permissions";

type Cell = (Role, NotificationAction, NotificationType, PermissionRule);

const PERMISSION_TABLE: &[Cell] = {
    use NotificationAction::{Create, Delete, Update};
    use NotificationType::{Agency, Listing, Peer, PeerBookmark, System};
    use PermissionRule::{Allow, Deny, RequireListingOwnership, Unsupported};
    use Role::{AppsMallSteward, OrgSteward, User};

    &[
        (AppsMallSteward, Create, System, Allow),
        (AppsMallSteward, Create, Agency, Allow),
        (AppsMallSteward, Create, Listing, Allow),
        (AppsMallSteward, Create, Peer, Allow),
        (AppsMallSteward, Create, PeerBookmark, Allow),
        (AppsMallSteward, Update, System, Allow),
        (AppsMallSteward, Update, Agency, Allow),
        (AppsMallSteward, Update, Listing, Allow),
        (AppsMallSteward, Update, Peer, Allow),
        (AppsMallSteward, Update, PeerBookmark, Allow),
        (AppsMallSteward, Delete, System, Allow),
        (AppsMallSteward, Delete, Agency, Allow),
        (AppsMallSteward, Delete, Listing, Allow),
        (AppsMallSteward, Delete, Peer, Allow),
        (AppsMallSteward, Delete, PeerBookmark, Allow),
        (OrgSteward, Create, System, Allow),
        (OrgSteward, Create, Agency, Allow),
        (OrgSteward, Create, Listing, Allow),
        (OrgSteward, Create, Peer, Allow),
        (OrgSteward, Create, PeerBookmark, Allow),
        (OrgSteward, Update, System, Allow),
        (OrgSteward, Update, Agency, Allow),
        (OrgSteward, Update, Listing, Allow),
        (OrgSteward, Update, Peer, Allow),
        (OrgSteward, Update, PeerBookmark, Allow),
        (OrgSteward, Delete, System, Allow),
        (OrgSteward, Delete, Agency, Allow),
        (OrgSteward, Delete, Listing, Allow),
        (OrgSteward, Delete, Peer, Allow),
        (OrgSteward, Delete, PeerBookmark, Allow),
        (User, Create, System, Deny(ONLY_STEWARDS_CREATE_SYSTEM)),
        (User, Create, Agency, Deny(ONLY_ORG_STEWARDS_AGENCY)),
        (User, Create, Listing, RequireListingOwnership),
        (User, Create, Peer, Allow),
        (User, Create, PeerBookmark, Allow),
        (User, Update, System, Deny(ONLY_STEWARDS_UPDATE_SYSTEM)),
        (User, Update, Agency, Deny(ONLY_ORG_STEWARDS_AGENCY)),
        (User, Update, Listing, Unsupported),
        (User, Update, Peer, Allow),
        (User, Update, PeerBookmark, Allow),
        (User, Delete, System, Deny(ONLY_STEWARDS_DELETE_SYSTEM)),
        (User, Delete, Agency, Deny(ONLY_ORG_STEWARDS_AGENCY)),
        (User, Delete, Listing, Unsupported),
        (User, Delete, Peer, Allow),
        (User, Delete, PeerBookmark, Allow),
    ]
};

/// Rule for one cell; cells missing from the table are [`PermissionRule::Unsupported`].
#[must_use]
pub fn permission_rule(
    role: Role,
    action: NotificationAction,
    notification_type: NotificationType,
) -> PermissionRule {
    PERMISSION_TABLE
        .iter()
        .find(|(cell_role, cell_action, cell_type, _)| {
            *cell_role == role && *cell_action == action && *cell_type == notification_type
        })
        .map_or(PermissionRule::Unsupported, |(_, _, _, rule)| *rule)
}

/// # Errors
/// Returns [`PermissionDenied`] with the rule's reason when the cell denies,
/// requires listing ownership the caller lacks, or is unsupported.
pub fn check_notification_permission(
    role: Role,
    action: NotificationAction,
    notification_type: NotificationType,
    context: PermissionContext,
) -> Result<(), PermissionDenied> {
    match permission_rule(role, action, notification_type) {
        PermissionRule::Allow => Ok(()),
        PermissionRule::Deny(reason) => Err(PermissionDenied(reason.to_string())),
        PermissionRule::RequireListingOwnership if context.owns_listing => Ok(()),
        PermissionRule::RequireListingOwnership => {
            Err(PermissionDenied(NOT_LISTING_OWNER.to_string()))
        }
        PermissionRule::Unsupported => Err(PermissionDenied(UNKNOWN_PERMISSIONS.to_string())),
    }
}
