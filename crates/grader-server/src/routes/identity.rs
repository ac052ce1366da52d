//! Identity endpoints.
//!
//! Every mutation is a signed envelope verified before the store is touched.
//! Creation has one special case: the very first request of a new key
//! cannot resolve its signer, so it is accepted when the payload proves
//! possession of the key it registers and matches the client certificate.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use grader_crypto::{decode_public_key, ErrorCode, KeyEncoding, SigningContext};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::models::{
    canonical_email, canonical_name, DeleteIdentity, IdentityPreview, IdentityRecord,
    IdentityUpdate, IdentityView, NewIdentity,
};
use crate::store::{IdentityFilter, MAX_PAGE_SIZE};
use crate::verifier::{BodyRequirement, EnvelopeVerifier, SignedRequest, VerifyError};

/// Query parameters for listing identities.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListIdentitiesQuery {
    pub email: Option<String>,
    pub username: Option<String>,
    pub kid: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Creates the identity router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/identities", get(list_identities).post(create_identity))
        .route("/identities/", get(list_identities).post(create_identity))
        .route(
            "/identities/{id}",
            get(get_identity).put(update_identity).delete(delete_identity),
        )
        .with_state(state)
}

/// POST /api/v1/identities
///
/// Registers an identity. The envelope is signed either by an existing
/// identity or, for bootstrap, by the key being registered.
async fn create_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IdentityView>), AppError> {
    let request = SignedRequest::<NewIdentity>::parse(&body, BodyRequirement::Required)?;
    let payload = request.require_payload()?;
    let context = SigningContext::new();

    let record = match state.verifier.verify(&request, &context).await {
        Ok(signer) => {
            let record = payload.validate()?;
            info!(signer = %signer.id, kid = %record.fingerprint, "Identity registered by existing identity");
            record
        }
        Err(VerifyError::KidUnknown(kid)) => {
            let record = bootstrap(&state, &headers, &request, &context)?;
            info!(kid = %kid, email = %record.canonical_email, "Identity bootstrapped");
            record
        }
        Err(e) => return Err(e.into()),
    };

    let identity = state.store.insert(record).await?;
    Ok((StatusCode::CREATED, Json(identity.view())))
}

/// Accepts a self-signed registration from a key that is not yet known.
///
/// The payload must validate, the signature's key id must be the payload
/// key's fingerprint, the client certificate CN must equal the payload
/// email, and the signature must verify with the payload key.
fn bootstrap(
    state: &AppState,
    headers: &HeaderMap,
    request: &SignedRequest<NewIdentity>,
    context: &SigningContext,
) -> Result<IdentityRecord, AppError> {
    let payload = request.require_payload()?;
    let kid_unknown = |reason: &str| {
        warn!(kid = %request.signature().key_id, reason, "Bootstrap rejected");
        AppError::Forbidden {
            message: format!("Unknown key id '{}'", request.signature().key_id),
            code: Some(ErrorCode::KidUnknown),
        }
    };

    let record = payload
        .validate()
        .map_err(|_| kid_unknown("payload does not validate"))?;
    if request.signature().key_id != record.fingerprint {
        return Err(kid_unknown("key id does not match the registered key"));
    }

    let common_name = headers
        .get(&state.client_cert_header)
        .and_then(|value| value.to_str().ok());
    if common_name != Some(payload.email.as_str()) {
        return Err(kid_unknown("client certificate does not match the email"));
    }

    let key = decode_public_key(&record.public_key, KeyEncoding::B64_DER)
        .map_err(VerifyError::from)?;
    EnvelopeVerifier::verify_with_key(request, context, &key)?;
    Ok(record)
}

/// GET /api/v1/identities
///
/// Lists identity previews, optionally filtered by email, username or key id.
async fn list_identities(
    State(state): State<AppState>,
    Query(query): Query<ListIdentitiesQuery>,
) -> Result<Json<Vec<IdentityPreview>>, AppError> {
    let filter = IdentityFilter {
        canonical_name: query.username.as_deref().map(canonical_name).transpose()?,
        canonical_email: query.email.as_deref().map(canonical_email).transpose()?,
        fingerprint: query.kid,
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(MAX_PAGE_SIZE),
    };

    let identities = state.store.list(&filter).await?;
    Ok(Json(identities.iter().map(|identity| identity.preview()).collect()))
}

/// GET /api/v1/identities/{id}
async fn get_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IdentityView>, AppError> {
    let identity = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Identity {} not found", id)))?;
    Ok(Json(identity.view()))
}

/// PUT /api/v1/identities/{id}
///
/// Updates an identity. The envelope must be signed by the identity itself
/// with the id as the only context parameter.
async fn update_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<IdentityView>, AppError> {
    let request = SignedRequest::<IdentityUpdate>::parse(&body, BodyRequirement::Required)?;
    let signer = state
        .verifier
        .verify(&request, &SigningContext::new().param(id))
        .await?;
    if signer.id != id {
        return Err(AppError::forbidden("Identities can only update themselves"));
    }

    let not_found = || AppError::NotFound(format!("Identity {} not found", id));
    let current = state.store.get(id).await?.ok_or_else(not_found)?;
    let record = current.apply(request.require_payload()?)?;
    let identity = state.store.update(id, record).await?.ok_or_else(not_found)?;

    // The cached entry under the old key id is stale whether or not the key changed.
    state.cache().invalidate(&current.fingerprint);
    if identity.fingerprint != current.fingerprint {
        info!(id = %id, old_kid = %current.fingerprint, kid = %identity.fingerprint, "Identity key rotated");
    }
    Ok(Json(identity.view()))
}

/// DELETE /api/v1/identities/{id}
///
/// Deletes an identity. The payload repeats the id so the signature covers
/// the request; the signer must be the identity itself.
async fn delete_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let request = SignedRequest::<DeleteIdentity>::parse(&body, BodyRequirement::Required)?;
    let signer = state
        .verifier
        .verify(&request, &SigningContext::new().param(id))
        .await?;
    if request.require_payload()?.target()? != id {
        return Err(AppError::BadRequest {
            message: "Payload id does not match the path".to_string(),
            code: Some(ErrorCode::InvalidInput),
        });
    }
    if signer.id != id {
        return Err(AppError::forbidden("Identities can only delete themselves"));
    }

    if !state.store.delete(id).await? {
        return Err(AppError::NotFound(format!("Identity {} not found", id)));
    }

    state.cache().invalidate_all();
    info!(id = %id, kid = %signer.fingerprint, "Identity deleted");
    Ok(StatusCode::NO_CONTENT)
}
