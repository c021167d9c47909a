//! Tenant identity carried on every request as the `X-Scope-OrgID` header.

use crate::errors::FrontendError;
use http::HeaderValue;
use hyper::Request;

pub const ORG_ID_HEADER: &str = "x-scope-orgid";

/// Returns the tenant of a request.
pub fn extract_org_id<B>(request: &Request<B>) -> Result<&str, FrontendError> {
    request
        .headers()
        .get(ORG_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|org_id| !org_id.is_empty())
        .ok_or(FrontendError::MissingTenant)
}

/// Ensures the request carries a tenant, falling back to `default_org_id`.
///
/// An explicit header always wins over the default.
pub fn ensure_org_id<B>(
    request: &mut Request<B>,
    default_org_id: Option<&str>,
) -> Result<(), FrontendError> {
    if extract_org_id(request).is_ok() {
        return Ok(());
    }

    let org_id = default_org_id.ok_or(FrontendError::MissingTenant)?;
    let value = HeaderValue::from_str(org_id).map_err(|_| FrontendError::MissingTenant)?;
    request.headers_mut().insert(ORG_ID_HEADER, value);
    Ok(())
}
