use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::policy::{default_policy, AccessPolicy};

const SEGMENT_DELIMITER: &str = "//";

/// Classification levels in ascending order of sensitivity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationLevel {
    Unclassified,
    Confidential,
    Secret,
    TopSecret,
}

impl ClassificationLevel {
    pub const ALL: [Self; 4] = [Self::Unclassified, Self::Confidential, Self::Secret, Self::TopSecret];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unclassified => "UNCLASSIFIED",
            Self::Confidential => "CONFIDENTIAL",
            Self::Secret => "SECRET",
            Self::TopSecret => "TOP SECRET",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unclassified => "Unclassified",
            Self::Confidential => "Confidential",
            Self::Secret => "Secret",
            Self::TopSecret => "Top Secret",
        }
    }

    /// Case-insensitive match against the canonical level names.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|level| level.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Token {
    Classification { level: ClassificationLevel },
    DisseminationControl { code: String, label: String },
    Unknown { raw: String },
}

impl Token {
    /// Code used for formal-access and group lookups.
    ///
    /// `None` for classification tokens.
    #[must_use]
    pub fn access_code(&self) -> Option<&str> {
        match self {
            Self::Classification { .. } => None,
            Self::DisseminationControl { code, .. } => Some(code.as_str()),
            Self::Unknown { raw } => Some(raw.trim()),
        }
    }

    #[must_use]
    pub fn classification(&self) -> Option<ClassificationLevel> {
        match self {
            Self::Classification { level } => Some(*level),
            _ => None,
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classification { level } => write!(f, "ClassificationToken({})", level.label()),
            Self::DisseminationControl { label, .. } => {
                write!(f, "DisseminationControlToken({label})")
            }
            Self::Unknown { raw } => write!(f, "UnknownToken({raw})"),
        }
    }
}

impl AccessPolicy {
    /// Split a marking into typed tokens, preserving segment order.
    ///
    /// Never fails: an unrecognised leading segment becomes an
    /// [`Token::Unknown`], which evaluators treat as a denial.
    #[must_use]
    pub fn tokenize(&self, marking: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        for (index, segment) in marking.split(SEGMENT_DELIMITER).enumerate() {
            if index == 0 {
                if let Some(level) = ClassificationLevel::parse(segment) {
                    tokens.push(Token::Classification { level });
                    continue;
                }
            }

            let token = match self.dissemination_control(segment) {
                Some(control) => Token::DisseminationControl {
                    code: control.code.trim().to_ascii_uppercase(),
                    label: control.label.clone(),
                },
                None => Token::Unknown { raw: segment.to_string() },
            };
            tokens.push(token);
        }
        tokens
    }

    /// True when the marking is non-empty and leads with a classification.
    #[must_use]
    pub fn validate_marking(&self, marking: Option<&str>) -> bool {
        let Some(marking) = marking else {
            return false;
        };
        if marking.trim().is_empty() {
            return false;
        }
        self.tokenize(marking).first().and_then(Token::classification).is_some()
    }
}

/// Tokenize against the process-wide default policy.
#[must_use]
pub fn tokenize(marking: &str) -> Vec<Token> {
    default_policy().tokenize(marking)
}

/// Validate against the process-wide default policy.
#[must_use]
pub fn validate_marking(marking: Option<&str>) -> bool {
    default_policy().validate_marking(marking)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(marking: &str) -> String {
        let tokens = tokenize(marking).iter().map(ToString::to_string).collect::<Vec<_>>();
        format!("[{}]", tokens.join(", "))
    }

    #[test]
    fn splits_classification_dissemination_and_unknown_tokens() {
        assert_eq!(
            rendered("UNCLASSIFIED//FOUO//ABC"),
            "[ClassificationToken(Unclassified), DisseminationControlToken(FOR OFFICIAL USE ONLY), UnknownToken(ABC)]"
        );
        assert_eq!(rendered("UNCLASSIFIED"), "[ClassificationToken(Unclassified)]");
    }

    #[test]
    fn classification_segment_is_case_insensitive() {
        assert_eq!(tokenize("UNcLaSsIfied"), tokenize("UNCLASSIFIED"));
        assert_eq!(
            tokenize("top secret//fouo"),
            vec![
                Token::Classification { level: ClassificationLevel::TopSecret },
                Token::DisseminationControl {
                    code: "FOUO".to_string(),
                    label: "FOR OFFICIAL USE ONLY".to_string(),
                },
            ]
        );
    }

    #[test]
    fn single_slash_stays_inside_one_segment() {
        let tokens = tokenize("SECRET//FOUO//ABC/XYZ");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2], Token::Unknown { raw: "ABC/XYZ".to_string() });
    }

    #[test]
    fn unknown_leading_segment_yields_no_classification() {
        let tokens = tokenize("INVALID LEVEL");
        assert_eq!(tokens, vec![Token::Unknown { raw: "INVALID LEVEL".to_string() }]);

        let tokens = tokenize("Invalid//FOUO//ABC");
        assert!(tokens.iter().all(|token| token.classification().is_none()));
    }

    #[test]
    fn classification_is_only_recognised_in_first_position() {
        let tokens = tokenize("SECRET//SECRET");
        assert_eq!(tokens[1], Token::Unknown { raw: "SECRET".to_string() });
    }

    #[test]
    fn validate_marking_requires_leading_classification() {
        assert!(validate_marking(Some("UNCLASSIFIED")));
        assert!(validate_marking(Some("UNCLASSIFIED//FOUO//ABC")));
        assert!(!validate_marking(Some("Invalid//FOUO//ABC")));
        assert!(!validate_marking(Some("")));
        assert!(!validate_marking(Some("   ")));
        assert!(!validate_marking(None));
    }

    #[test]
    fn levels_follow_fixed_total_order() {
        assert!(ClassificationLevel::Unclassified < ClassificationLevel::Confidential);
        assert!(ClassificationLevel::Confidential < ClassificationLevel::Secret);
        assert!(ClassificationLevel::Secret < ClassificationLevel::TopSecret);
        for level in ClassificationLevel::ALL {
            assert_eq!(ClassificationLevel::parse(level.as_str()), Some(level));
        }
    }
}
