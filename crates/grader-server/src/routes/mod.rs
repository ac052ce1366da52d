//! API routes for the grader server.

pub mod identity;

use std::sync::Arc;

use axum::http::HeaderName;
use axum::Router;

use crate::cache::{IdentityLoader, KeyCache};
use crate::config::{CacheConfig, DEFAULT_CLIENT_CERT_HEADER};
use crate::store::IdentityStore;
use crate::verifier::EnvelopeVerifier;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IdentityStore>,
    pub verifier: EnvelopeVerifier,
    /// Header carrying the client certificate CN, set by the TLS proxy.
    pub client_cert_header: HeaderName,
}

impl AppState {
    /// Wires a store into a fresh key cache and verifier.
    pub fn new<S>(store: Arc<S>, cache: CacheConfig, client_cert_header: HeaderName) -> Self
    where
        S: IdentityStore + 'static,
    {
        let loader: Arc<dyn IdentityLoader> = store.clone();
        let cache = Arc::new(KeyCache::new(loader, cache));
        Self::with_cache(store, cache, client_cert_header)
    }

    /// Uses an existing key cache, e.g. one driven by a manual clock.
    pub fn with_cache<S>(store: Arc<S>, cache: Arc<KeyCache>, client_cert_header: HeaderName) -> Self
    where
        S: IdentityStore + 'static,
    {
        Self {
            store,
            verifier: EnvelopeVerifier::new(cache),
            client_cert_header,
        }
    }

    /// State with default cache settings and header name.
    pub fn with_defaults<S>(store: Arc<S>) -> Self
    where
        S: IdentityStore + 'static,
    {
        Self::new(
            store,
            CacheConfig::default(),
            HeaderName::from_static(DEFAULT_CLIENT_CERT_HEADER),
        )
    }

    pub fn cache(&self) -> &Arc<KeyCache> {
        self.verifier.cache()
    }
}

/// Creates the main API router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new().nest("/api/v1", api_v1_routes(state))
}

/// Creates the v1 API routes.
fn api_v1_routes(state: AppState) -> Router {
    Router::new().merge(identity::router(state))
}
