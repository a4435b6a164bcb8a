//! Domain types shared by the fairvalue crates.
//!
//! Holds the subject-key and job-request model, wire tag constants for
//! the analysis service protocol, and the core error type.

pub mod error;
pub mod job_events;
pub mod request;
pub mod subject;
pub mod types;

pub use error::CoreError;
pub use request::JobRequest;
pub use subject::SubjectKey;
