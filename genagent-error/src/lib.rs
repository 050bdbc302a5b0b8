//! # genagent-error
//!
//! Unified error handling for GenAgent3D - following OpenDAL's error handling practices.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., ScriptFailed, InferenceFailed)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use genagent_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ScriptFailed, "NameError: name 'sofa' is not defined")
//!         .with_operation("executor::execute")
//!         .with_context("script", "gen_scene.py")
//!         .with_context("iteration", "1"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, genagent_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using GenAgent3D Error
pub type Result<T> = std::result::Result<T, Error>;
