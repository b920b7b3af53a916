use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$doc:meta] $name:ident),* $(,)?) => {
        $(
            #[$doc]
            #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(u64);

            impl $name {
                #[must_use]
                pub fn new(id: u64) -> Self {
                    Self(id)
                }

                #[must_use]
                pub fn value(&self) -> u64 {
                    self.0
                }
            }

            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({})", stringify!($name), self.0)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = ParseIdError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    s.trim()
                        .parse::<u64>()
                        .map(Self::new)
                        .map_err(|_| ParseIdError {
                            kind: stringify!($name),
                        })
                }
            }
        )*
    };
}

numeric_id!(
    /// Identifier of a top-level taxonomy group
    GroupId,
    /// Identifier of a subject inside a group
    SubjectId,
    /// Identifier of a category inside a subject
    CategoryId,
    /// Identifier of a subcategory inside a category
    SubCategoryId,
    /// Identifier of a question
    QuestionId,
);

/// Opaque key of a quiz session, handed to the client on start.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(Uuid);

impl SessionKey {
    /// Creates a fresh random session key.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl FromStr for SessionKey {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseIdError { kind: "SessionKey" })
    }
}

// ─── Parse Errors ──────────────────────────────────────────────────────────────

/// Error type for parsing an identifier from a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_display_and_debug() {
        let id = QuestionId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{id:?}"), "QuestionId(42)");
    }

    #[test]
    fn numeric_ids_parse_with_whitespace() {
        let id: SubjectId = " 7 ".parse().unwrap();
        assert_eq!(id, SubjectId::new(7));
    }

    #[test]
    fn invalid_id_names_its_kind() {
        let err = "seven".parse::<CategoryId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse CategoryId from string");
    }

    #[test]
    fn ids_serialize_as_bare_numbers() {
        let json = serde_json::to_string(&GroupId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: GroupId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GroupId::new(3));
    }

    #[test]
    fn session_key_round_trips_through_text() {
        let key = SessionKey::generate();
        let parsed: SessionKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("not-a-session".parse::<SessionKey>().is_err());
    }
}
