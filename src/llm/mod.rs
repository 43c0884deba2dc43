//! LLM provider abstraction layer
//!
//! Provider-agnostic completion interface with OpenAI, Anthropic, Gemini and
//! offline mock backends, plus the [`Generate`] seam the pipeline consumes.

pub mod generator;
pub mod provider;
pub mod providers;

pub use generator::*;
pub use provider::*;
pub use providers::*;
