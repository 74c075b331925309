//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the REST layer.

use serde::{Deserialize, Serialize};

use hirewire_shared::UserId;

pub use hirewire_shared::Message;

// ---------------------------------------------------------------------------
// Job seeker
// ---------------------------------------------------------------------------

/// A job seeker account, as far as messaging needs to know it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobSeeker {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub job_preference: Option<String>,
    pub skills: Vec<String>,
    /// Years of experience.
    pub experience: i64,
    /// Whether the personality assessment has been completed. Employers
    /// only see job seekers for whom this is true.
    pub test_completed: bool,
}

// ---------------------------------------------------------------------------
// Employer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Employer {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub industry: Option<String>,
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A user someone may open a conversation with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "userType")]
pub enum Contact {
    #[serde(rename = "Jobseeker")]
    Jobseeker(JobSeeker),
    #[serde(rename = "Employeer")]
    Employer(Employer),
}
