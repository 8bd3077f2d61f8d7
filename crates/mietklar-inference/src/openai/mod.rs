//! OpenAI-compatible chat completions backend.

mod backend;
pub mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
