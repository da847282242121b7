// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # flowspec — declarative workflow specification validation
//!
//! A workflow document declares **parties**, **object types**, **object
//! promises**, **actions** (CREATE/EDIT operations over promised
//! objects), **checkpoints** (boolean dependency gates), **thread
//! groups** (parameterized parallel scopes), and **aggregation
//! pipelines** (map-reduce dataflow over refs and thread variables).
//! flowspec decides whether such a document is internally consistent and
//! returns a complete, deterministic list of human-readable diagnostics.
//!
//! The validator is pure: document in, `(errors, warnings)` out. No code
//! generation, no execution of the workflow, no I/O beyond the optional
//! file entry point.
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//!
//! let document = json!({
//!     "standard": "example",
//!     "parties": [{"id": 0, "name": "Project"}],
//!     "object_types": {
//!         "Placeholder": {"completed": {"field_type": "BOOLEAN"}}
//!     },
//!     "object_promises": [
//!         {"id": 0, "name": "placeholder", "object_type": "Placeholder"}
//!     ],
//!     "actions": [{
//!         "id": 0,
//!         "object_promise": "object_promise:0",
//!         "party": "party:{Project}",
//!         "operation": {"include": ["completed"]}
//!     }],
//!     "checkpoints": []
//! });
//!
//! let report = flowspec::validate(&document);
//! assert!(report.is_valid(), "{:?}", report.errors);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                                                            │
//! │  DOCUMENT (JSON/YAML tree)                                 │
//! │       │                                                    │
//! │       ├──► collect ──► indices, pseudo-checkpoints         │
//! │       │                                                    │
//! │       ├──► spec walk ──► structural + reference checks     │
//! │       │        └──► hooks: operations, threads, pipelines  │
//! │       │                                                    │
//! │       └──► cycle scan ──► circular-dependency check        │
//! │                                                            │
//! │  ValidationReport { errors, warnings }                     │
//! │                                                            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation is driven by a small spec interpreter: each entity kind has
//! a declarative spec (shape, constraints, conditional overrides, ref
//! rules) in the catalog, and a generic walker checks the document
//! against it. Cross-cutting semantics — promise fulfillment, dependency
//! ancestry, thread-scope visibility, pipeline flow typing — hang off the
//! specs as named validation hooks.

// Core data model
pub mod error;
pub mod refs;
pub mod spec;
pub mod types;
pub mod util;

// Spec definitions
pub mod catalog;

// The validator and its analysis passes
mod collect;
mod compare;
mod graph;
mod interpreter;
mod operations;
pub mod pipeline;
mod resolve;
pub mod threads;
mod typing;
pub mod validator;

// Re-exports
pub use error::{Error, Result};
pub use refs::{parse_global_ref, GlobalRef, RefKind, RefTarget};
pub use types::{ComparisonOperator, ItemType, TypeDetails};
pub use validator::{validate, ValidationReport, Validator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
