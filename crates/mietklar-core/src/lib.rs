//! # mietklar-core
//!
//! Core types, traits, and abstractions for the mietklar contract analysis
//! service.
//!
//! This crate provides:
//! - Domain models (contracts, page files, extracted details)
//! - The shared [`Error`]/[`Result`] types
//! - Repository and backend traits implemented by the other crates
//! - Default constants shared across crates
//! - The [`EventBus`] used by the status stream

pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod traits;

pub use error::{Error, Result};
pub use events::{EventBus, ServerEvent};
pub use models::{
    detail_schema_description, is_detail_field, Contract, ContractDetails, ContractFile,
    ContractStatus, SimplifiedParagraph, TokenUsage, DETAIL_FIELDS,
};
pub use storage::FilesystemBackend;
pub use traits::{
    AllowAllEntitlements, ChatBackend, ContractDetailsRepository, ContractFileRepository,
    ContractRepository, CreateContractRequest, EntitlementProvider, Generation, GeoPoint,
    Geocoder, ImageInput, StorageBackend, TileFetcher,
};
