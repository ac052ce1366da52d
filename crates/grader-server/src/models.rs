//! Data models for the grader server.

pub mod identity;

pub use identity::{
    canonical_email, canonical_name, DeleteIdentity, Identity, IdentityPreview, IdentityRecord,
    IdentityUpdate, IdentityView, ModelError, NewIdentity,
};
