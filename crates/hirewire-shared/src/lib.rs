//! # hirewire-shared
//!
//! Types shared by the Hirewire messaging crates: user identities, the
//! persisted message record, and the JSON event protocol spoken over the
//! live transport.

pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use error::{ProtocolError, ValidationError};
pub use message::Message;
pub use types::{UserId, UserIdentity, UserKind};
