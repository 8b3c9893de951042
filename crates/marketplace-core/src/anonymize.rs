use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::AccessProfile;
use crate::policy::AccessPolicy;

const DEFAULT_PLACEHOLDER: &str = "REDACTED";

/// Replacement of identifiable fields in outbound records.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AnonymizationPolicy {
    /// Process-wide toggle. When off nothing is anonymized.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_placeholder")]
    pub default_placeholder: String,
    #[serde(default)]
    pub placeholders: BTreeMap<String, String>,
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

impl Default for AnonymizationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            default_placeholder: default_placeholder(),
            placeholders: BTreeMap::new(),
        }
    }
}

/// Who is asking, as far as anonymization is concerned.
#[derive(Debug, Clone, Copy)]
pub struct UserIdentity<'a> {
    pub access: &'a AccessProfile,
    /// Explicit per-profile flag; wins over the country default.
    pub anonymize_identifiable_data: Option<bool>,
}

impl AnonymizationPolicy {
    #[must_use]
    pub fn anonymize(&self, field: &str) -> &str {
        self.placeholders.get(field).map_or(self.default_placeholder.as_str(), String::as_str)
    }
}

impl AccessPolicy {
    /// Whether identifiable values must be replaced before data reaches `identity`.
    ///
    /// Without a per-profile flag, only super-country profiles see raw values.
    #[must_use]
    pub fn should_anonymize(&self, identity: &UserIdentity<'_>) -> bool {
        if !self.anonymization.enabled {
            return false;
        }
        if let Some(flag) = identity.anonymize_identifiable_data {
            return flag;
        }
        !self.is_super_country(identity.access.country.as_deref())
    }

    #[must_use]
    pub fn anonymize(&self, field: &str) -> &str {
        self.anonymization.anonymize(field)
    }
}
