use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque user identifier as issued by the auth layer (the subject of the
/// bearer credential).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse an optional, possibly blank identifier from a request body.
    pub fn parse_optional(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Self(s.to_string()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two disjoint user categories of the marketplace.
///
/// Serialized with the spelling the auth layer puts in its tokens
/// (`"Jobseeker"` / `"Employeer"`); `"Employer"` is accepted on input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserKind {
    #[serde(rename = "Jobseeker", alias = "JobSeeker")]
    Jobseeker,
    #[serde(rename = "Employeer", alias = "Employer")]
    Employer,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Jobseeker => "Jobseeker",
            UserKind::Employer => "Employeer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Jobseeker" | "JobSeeker" => Some(UserKind::Jobseeker),
            "Employeer" | "Employer" => Some(UserKind::Employer),
            _ => None,
        }
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the polymorphic user lookup: which collection the user lives
/// in and how to display them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: UserId,
    pub kind: UserKind,
    pub display_name: String,
}
