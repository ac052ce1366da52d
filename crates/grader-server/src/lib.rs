//! Grader Server - signed-request API for the grading platform
//!
//! This crate verifies signed request envelopes against registered
//! identities and exposes the identity registry over HTTP.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod store;
pub mod verifier;

pub use cache::KeyCache;
pub use config::{CacheConfig, Config};
pub use error::AppError;
pub use routes::{create_router, AppState};
pub use verifier::{BodyRequirement, EnvelopeVerifier, SignedRequest, VerifyError};
