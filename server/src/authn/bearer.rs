//! Bearer-token extraction and caller resolution
//!
//! Credential issuance is a collaborator concern; the core only consumes
//! "authenticated as admin" and "authenticated as device" facts. Admin
//! requests carry a configured opaque admin token, device requests carry
//! the token minted at registration.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::errors::CoreError;
use crate::registry::device::Device;
use crate::registry::registry::DeviceRegistry;

/// Extract the bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, CoreError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| CoreError::Unauthenticated("missing Authorization header".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| CoreError::Unauthenticated("malformed Authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| CoreError::Unauthenticated("expected a bearer token".to_string()))?;

    if token.is_empty() {
        return Err(CoreError::Unauthenticated("empty bearer token".to_string()));
    }
    Ok(token)
}

/// Require the caller to be the configured admin
pub fn require_admin(headers: &HeaderMap, admin_token: &str) -> Result<(), CoreError> {
    let token = bearer_token(headers)?;
    if token != admin_token {
        return Err(CoreError::Unauthenticated("admin token mismatch".to_string()));
    }
    Ok(())
}

/// Require the caller to be a registered, non-tombstoned device
pub fn require_device(headers: &HeaderMap, registry: &DeviceRegistry) -> Result<Device, CoreError> {
    let token = bearer_token(headers)?;
    registry.resolve_token(token)
}
