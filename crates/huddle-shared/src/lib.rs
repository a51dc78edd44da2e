//! # huddle-shared
//!
//! Types shared by the store and the server: status enums, application
//! constants, and the input validation that runs before any store operation.

pub mod constants;
pub mod error;
pub mod types;
pub mod validation;

pub use error::ValidationError;
pub use types::{DmRequestStatus, UserStatus};
