//! Service construction and lifecycle.

pub mod container;

pub use container::ServiceContainer;
