use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::marking::{ClassificationLevel, Token};
use crate::policy::{default_policy, AccessPolicy, SuperCountryOverride};

/// Security context of one user, deserialized from the flat access JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct AccessProfile {
    #[serde(default)]
    pub clearances: BTreeSet<String>,
    #[serde(default)]
    pub formal_accesses: BTreeSet<String>,
    #[serde(default)]
    pub visas: BTreeSet<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl AccessProfile {
    /// # Errors
    /// Returns [`AccessDenial::MalformedProfile`] when `raw` is not a valid
    /// access object.
    pub fn from_json(raw: &str) -> Result<Self, AccessDenial> {
        serde_json::from_str(raw).map_err(|err| AccessDenial::MalformedProfile(err.to_string()))
    }

    /// Highest recognised clearance; unrecognised strings are ignored.
    #[must_use]
    pub fn max_clearance(&self) -> Option<ClassificationLevel> {
        self.clearances.iter().filter_map(|value| ClassificationLevel::parse(value)).max()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Clearances, formal accesses and visas only.
    Legacy,
    /// Adds the releasability group table and the super-country override.
    #[default]
    Updated,
}

impl EvaluationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Updated => "updated",
        }
    }

}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AccessGrant {
    Cleared,
    SuperCountry,
}

/// Why a marking was denied. Only audit paths see this; callers get `false`.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AccessDenial {
    #[error("marking is missing or empty")]
    MissingMarking,
    #[error("marking has no leading classification")]
    MalformedMarking,
    #[error("access profile is malformed: {0}")]
    MalformedProfile(String),
    #[error("classification {} exceeds the profile clearance", .required.as_str())]
    InsufficientClearance { required: ClassificationLevel },
    #[error("profile does not satisfy group `{0}`")]
    GroupMembership(String),
    #[error("token `{0}` is neither a held formal access nor a known group")]
    UnknownAccessGroup(String),
}

/// Marking evaluator bound to one policy table and one evaluation mode.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'p> {
    policy: &'p AccessPolicy,
    mode: EvaluationMode,
}

impl<'p> Evaluator<'p> {
    #[must_use]
    pub fn new(policy: &'p AccessPolicy, mode: EvaluationMode) -> Self {
        Self { policy, mode }
    }

    #[must_use]
    pub fn legacy(policy: &'p AccessPolicy) -> Self {
        Self::new(policy, EvaluationMode::Legacy)
    }

    #[must_use]
    pub fn updated(policy: &'p AccessPolicy) -> Self {
        Self::new(policy, EvaluationMode::Updated)
    }

    #[must_use]
    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Evaluate one marking for one profile.
    ///
    /// # Errors
    /// Returns the first [`AccessDenial`] encountered; all tokens after the
    /// classification are conjunctive.
    pub fn evaluate(
        &self,
        profile: &AccessProfile,
        marking: Option<&str>,
    ) -> Result<AccessGrant, AccessDenial> {
        let marking = match marking {
            Some(value) if !value.trim().is_empty() => value,
            _ => return Err(AccessDenial::MissingMarking),
        };

        let tokens = self.policy.tokenize(marking);
        let Some((first, rest)) = tokens.split_first() else {
            return Err(AccessDenial::MalformedMarking);
        };
        let Some(level) = first.classification() else {
            return Err(AccessDenial::MalformedMarking);
        };

        match self.mode {
            EvaluationMode::Legacy => {
                check_clearance(profile, level)?;
                for token in rest {
                    check_legacy_token(profile, token)?;
                }
                Ok(AccessGrant::Cleared)
            }
            EvaluationMode::Updated => {
                let is_super = self.policy.is_super_country(profile.country.as_deref());
                if is_super && self.policy.super_country_override == SuperCountryOverride::Full {
                    return Ok(AccessGrant::SuperCountry);
                }
                check_clearance(profile, level)?;
                if is_super {
                    return Ok(AccessGrant::SuperCountry);
                }
                for token in rest {
                    self.check_updated_token(profile, token)?;
                }
                Ok(AccessGrant::Cleared)
            }
        }
    }

    #[must_use]
    pub fn permits(&self, profile: &AccessProfile, marking: Option<&str>) -> bool {
        self.evaluate(profile, marking).is_ok()
    }

    /// Evaluate with the access profile still in its serialized JSON form.
    ///
    /// Malformed JSON denies.
    #[must_use]
    pub fn permits_json(&self, profile_json: &str, marking: Option<&str>) -> bool {
        AccessProfile::from_json(profile_json)
            .and_then(|profile| self.evaluate(&profile, marking))
            .is_ok()
    }

    /// Lazily keep the items whose marking the profile may see.
    pub fn filter<'a, T, I, F>(
        self,
        profile: &'a AccessProfile,
        items: I,
        marking_of: F,
    ) -> impl Iterator<Item = T> + 'a
    where
        'p: 'a,
        T: 'a,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'a,
        F: Fn(&T) -> Option<&str> + 'a,
    {
        items.into_iter().filter(move |item| self.permits(profile, marking_of(item)))
    }

    fn check_updated_token(
        &self,
        profile: &AccessProfile,
        token: &Token,
    ) -> Result<(), AccessDenial> {
        let Some(code) = token.access_code() else {
            return Ok(());
        };
        if code.is_empty() {
            return Err(AccessDenial::MalformedMarking);
        }

        if let Some(group) = self.policy.group(code) {
            if group.admits(profile) {
                return Ok(());
            }
            return Err(AccessDenial::GroupMembership(group.name.clone()));
        }

        if holds(&profile.formal_accesses, code) {
            return Ok(());
        }
        Err(AccessDenial::UnknownAccessGroup(code.to_string()))
    }
}

fn check_clearance(profile: &AccessProfile, required: ClassificationLevel) -> Result<(), AccessDenial> {
    match profile.max_clearance() {
        Some(max) if max >= required => Ok(()),
        _ => Err(AccessDenial::InsufficientClearance { required }),
    }
}

fn check_legacy_token(profile: &AccessProfile, token: &Token) -> Result<(), AccessDenial> {
    let Some(code) = token.access_code() else {
        return Ok(());
    };
    if code.is_empty() {
        return Err(AccessDenial::MalformedMarking);
    }
    if holds(&profile.formal_accesses, code) || holds(&profile.visas, code) {
        return Ok(());
    }
    Err(AccessDenial::UnknownAccessGroup(code.to_string()))
}

/// Marking codes compare case-insensitively, like dissemination controls.
fn holds(held: &BTreeSet<String>, code: &str) -> bool {
    held.iter().any(|value| {
        let value = value.trim();
        !value.is_empty() && value.eq_ignore_ascii_case(code)
    })
}

/// Current evaluator against the default policy.
#[must_use]
pub fn has_access(profile: &AccessProfile, marking: &str) -> bool {
    has_access_updated(profile, marking)
}

#[must_use]
pub fn has_access_updated(profile: &AccessProfile, marking: &str) -> bool {
    Evaluator::updated(default_policy()).permits(profile, Some(marking))
}

#[must_use]
pub fn future_has_access(profile: &AccessProfile, marking: &str) -> bool {
    Evaluator::legacy(default_policy()).permits(profile, Some(marking))
}

#[must_use]
pub fn has_access_json_updated(profile_json: &str, marking: Option<&str>) -> bool {
    Evaluator::updated(default_policy()).permits_json(profile_json, marking)
}

#[must_use]
pub fn future_has_access_json(profile_json: &str, marking: Option<&str>) -> bool {
    Evaluator::legacy(default_policy()).permits_json(profile_json, marking)
}

/// Keep the items visible to `profile` under the default updated evaluator.
pub fn filter_accessible<'a, T, I, F>(
    items: I,
    profile: &'a AccessProfile,
    marking_of: F,
) -> impl Iterator<Item = T> + 'a
where
    T: 'a,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'a,
    F: Fn(&T) -> Option<&str> + 'a,
{
    Evaluator::updated(default_policy()).filter(profile, items, marking_of)
}
