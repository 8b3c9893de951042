use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::access::AccessProfile;
use crate::anonymize::AnonymizationPolicy;

pub const DEFAULT_POLICY_YAML: &str = include_str!("../policy/access_policy.v1.yaml");

static DEFAULT_POLICY: OnceLock<AccessPolicy> = OnceLock::new();

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PolicyError {
    #[error("failed to read access policy: {0}")]
    Io(String),
    #[error("failed to parse access policy: {0}")]
    Parse(String),
    #[error("invalid access policy: {0}")]
    Invalid(String),
}

/// How far the super-country override reaches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuperCountryOverride {
    /// Classification and every dissemination token pass.
    #[default]
    Full,
    /// Dissemination tokens pass; the classification check still applies.
    DisseminationOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DisseminationControl {
    pub code: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GroupRule {
    pub name: String,
    #[serde(default)]
    pub countries: BTreeSet<String>,
    #[serde(default)]
    pub visas: BTreeSet<String>,
}

impl GroupRule {
    /// Membership by country, or by holding any accepted visa.
    #[must_use]
    pub fn admits(&self, profile: &AccessProfile) -> bool {
        if let Some(country) = profile.country.as_deref() {
            if self.countries.contains(country) {
                return true;
            }
        }
        profile.visas.iter().any(|visa| self.visas.contains(visa))
    }
}

/// Versioned marking vocabulary, releasability groups and anonymization table.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AccessPolicy {
    pub version: String,
    pub super_country: String,
    #[serde(default)]
    pub super_country_override: SuperCountryOverride,
    #[serde(default)]
    pub dissemination_controls: Vec<DisseminationControl>,
    #[serde(default)]
    pub groups: Vec<GroupRule>,
    #[serde(default)]
    pub anonymization: AnonymizationPolicy,
}

impl AccessPolicy {
    /// Parse and validate a policy document.
    ///
    /// # Errors
    /// Returns [`PolicyError::Parse`] for malformed YAML and
    /// [`PolicyError::Invalid`] when the table violates its invariants.
    pub fn from_yaml_str(raw: &str) -> Result<Self, PolicyError> {
        let policy: Self =
            serde_yaml::from_str(raw).map_err(|err| PolicyError::Parse(err.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Read, parse and validate a policy file.
    ///
    /// # Errors
    /// Returns [`PolicyError::Io`] when the file cannot be read, otherwise the
    /// errors of [`AccessPolicy::from_yaml_str`].
    pub fn from_yaml_path(path: &Path) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| PolicyError::Io(format!("{}: {err}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    /// Policy with no vocabulary, no groups and no super country.
    ///
    /// Every marking with a dissemination token denies under it.
    #[must_use]
    pub fn deny_all() -> Self {
        Self {
            version: "deny-all".to_string(),
            super_country: String::new(),
            super_country_override: SuperCountryOverride::DisseminationOnly,
            dissemination_controls: Vec::new(),
            groups: Vec::new(),
            anonymization: AnonymizationPolicy::default(),
        }
    }

    /// # Errors
    /// Returns [`PolicyError::Invalid`] on empty identifiers or duplicate entries.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version.trim().is_empty() {
            return Err(PolicyError::Invalid("version MUST be provided".to_string()));
        }
        if self.super_country.trim().is_empty() {
            return Err(PolicyError::Invalid("super_country MUST be provided".to_string()));
        }

        let mut codes = BTreeSet::new();
        for control in &self.dissemination_controls {
            let code = control.code.trim().to_ascii_uppercase();
            if code.is_empty() || control.label.trim().is_empty() {
                return Err(PolicyError::Invalid(
                    "dissemination control code and label MUST be non-empty".to_string(),
                ));
            }
            if code.contains("//") {
                return Err(PolicyError::Invalid(format!(
                    "dissemination control `{code}` MUST NOT contain the segment delimiter"
                )));
            }
            if !codes.insert(code.clone()) {
                return Err(PolicyError::Invalid(format!(
                    "duplicate dissemination control `{code}`"
                )));
            }
        }

        let mut names = BTreeSet::new();
        for group in &self.groups {
            let name = group.name.trim().to_ascii_uppercase();
            if name.is_empty() {
                return Err(PolicyError::Invalid("group name MUST be non-empty".to_string()));
            }
            if !names.insert(name.clone()) {
                return Err(PolicyError::Invalid(format!("duplicate group `{name}`")));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn dissemination_control(&self, segment: &str) -> Option<&DisseminationControl> {
        let segment = segment.trim();
        self.dissemination_controls
            .iter()
            .find(|control| control.code.trim().eq_ignore_ascii_case(segment))
    }

    #[must_use]
    pub fn group(&self, code: &str) -> Option<&GroupRule> {
        let code = code.trim();
        self.groups.iter().find(|group| group.name.trim().eq_ignore_ascii_case(code))
    }

    #[must_use]
    pub fn is_super_country(&self, country: Option<&str>) -> bool {
        let super_country = self.super_country.trim();
        !super_country.is_empty() && country.is_some_and(|value| value.trim() == super_country)
    }
}

/// Process-wide policy parsed from [`DEFAULT_POLICY_YAML`] on first use.
///
/// Falls back to [`AccessPolicy::deny_all`] if the embedded document is
/// ever broken, so evaluation fails closed.
pub fn default_policy() -> &'static AccessPolicy {
    DEFAULT_POLICY.get_or_init(|| match AccessPolicy::from_yaml_str(DEFAULT_POLICY_YAML) {
        Ok(policy) => policy,
        Err(err) => {
            tracing::error!(error = %err, "embedded access policy is invalid; denying dissemination tokens");
            AccessPolicy::deny_all()
        }
    })
}
