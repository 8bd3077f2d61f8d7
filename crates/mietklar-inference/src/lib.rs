//! # mietklar-inference
//!
//! Chat-completion backend abstraction for mietklar.
//!
//! Provides the OpenAI-compatible implementation of [`ChatBackend`] used by
//! the analysis pipeline for text extraction (vision), structured detail
//! extraction (JSON mode), clause simplification, and neighborhood narration,
//! plus a deterministic mock backend for tests.

pub mod mock;
pub mod openai;

pub use mock::MockChatBackend;
pub use openai::{OpenAIBackend, OpenAIConfig};

// Re-export the trait and call types consumers need
pub use mietklar_core::{ChatBackend, Generation, ImageInput};
