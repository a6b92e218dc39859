use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::header_validator::CustomHeaderValidator;
use crate::utils::error::ApiError;

/// Authenticate the request headers and stash the resolved operator in the
/// request extensions for handlers to read.
pub async fn security_middleware(
    Extension(header_validator): Extension<Arc<CustomHeaderValidator>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let operator = header_validator.validate(request.headers())?;
    request.extensions_mut().insert(operator);
    Ok(next.run(request).await)
}
