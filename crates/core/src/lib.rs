//! Domain vocabulary shared by the easel workspace.
//!
//! Pure types and functions only: ids, task submissions, status payloads,
//! provider metadata, pricing, and validation. No I/O and no runtime; the
//! dispatch machinery lives in `easel-engine`.

pub mod error;
pub mod meta;
pub mod pricing;
pub mod status;
pub mod task;
pub mod types;
pub mod validation;

pub use error::CoreError;
