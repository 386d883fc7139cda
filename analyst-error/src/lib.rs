//! # analyst-error
//!
//! Unified error handling for the analyst workspace.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., InferenceFailed, FileNotFound)
//! - **ErrorStatus**: Decide how to handle it (Permanent or Temporary)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use analyst_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::InvalidArgument, "task text is empty")
//!         .with_operation("pipeline::run")
//!         .with_context("attachments", "2"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All fallible functions return `Result<T, analyst_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using analyst Error
pub type Result<T> = std::result::Result<T, Error>;
