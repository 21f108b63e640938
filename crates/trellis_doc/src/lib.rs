//! TRELLIS Documents
//!
//! The last stage of compilation: assembling an entity tree and its task
//! graphs into one submission-ready document, reading declarations from
//! authoring manifests, and the client interface an orchestrating caller
//! uses to submit documents and poll the runs they start.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod client;
pub mod document;
pub mod manifest;

pub use assembler::{Assembler, CompiledGraph};
pub use client::{ClientError, RecordingClient, RunState, RunStatus, SubmissionClient, SubmitReceipt};
pub use document::{Document, Metadata, Spec};
pub use manifest::{GraphDecl, Manifest, ManifestMetadata, RootDecl};
