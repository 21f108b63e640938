//! TRELLIS Core Types
//!
//! Pure types shared by every compilation stage: the error taxonomy,
//! task identifiers, document digests and the compiler configuration.
//! Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hash;
pub mod id;

// Re-exports
pub use config::{CompilerConfig, IdMode};
pub use error::{CompileError, CompileResult};
pub use hash::{Digest, DigestError};
pub use id::TaskId;
