//! # mietklar-pipeline
//!
//! The contract analysis pipeline: OCR text extraction with a process-wide
//! cache, concurrent structured detail extraction and paragraph
//! simplification, neighborhood enrichment from composited map tiles, and a
//! single merged persistence write per run.
//!
//! The orchestrator is [`ContractProcessor`]; everything else is a stage or
//! a collaborator behind one of the core traits.

pub mod chunking;
pub mod details;
pub mod json_repair;
pub mod map;
pub mod neighborhood;
pub mod ocr;
pub mod processor;
pub mod prompts;
pub mod simplify;

pub use map::{HttpGeocoder, HttpTileFetcher};
pub use ocr::OcrCache;
pub use processor::{ContractProcessor, ProcessOutcome};
