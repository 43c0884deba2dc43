//! Testing utilities and mock implementations
//!
//! Lets the pipeline be exercised without network access or real LLM providers.

pub mod mocks;

pub use mocks::*;
