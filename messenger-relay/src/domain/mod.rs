//! Domain value objects shared across the pipeline.

pub mod artifact;
pub mod retry_policy;

pub use artifact::{Artifact, OutputTarget};
pub use retry_policy::RetryPolicy;
