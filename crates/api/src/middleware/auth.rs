//! Project API key authentication.
//!
//! Every campaign route runs on behalf of one project, identified by its
//! secret key in `Authorization: Bearer <key>` or `X-API-Key: <key>`.
//! Public keys are for client-side tracking and never authorize these routes.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use mailcast_common::error::AppError;
use mailcast_common::types::Project;

use crate::state::AppState;

/// Prefix carried by every project secret key.
pub const SECRET_KEY_PREFIX: &str = "sk_";

/// The project a request was authenticated as.
///
/// ```ignore
/// async fn handler(auth: ProjectAuth) -> impl IntoResponse {
///     // auth.project is the calling project
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ProjectAuth {
    pub project: Project,
}

/// Pull the API key out of the request headers.
pub fn api_key_from_headers(headers: &HeaderMap) -> Result<String, AppError> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

    let key = bearer.or(api_key).map(str::trim).filter(|k| !k.is_empty());

    match key {
        Some(key) if key.starts_with(SECRET_KEY_PREFIX) => Ok(key.to_string()),
        Some(_) => Err(AppError::Auth(
            "Only secret keys can be used for this endpoint".to_string(),
        )),
        None => Err(AppError::Auth(
            "Missing API key. Use 'Bearer <secret key>' or 'X-API-Key: <secret key>'".to_string(),
        )),
    }
}

impl FromRequestParts<AppState> for ProjectAuth {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let store = state.store();
        let key = api_key_from_headers(&parts.headers);

        async move {
            let key = key?;
            match store.project_by_secret(&key).await? {
                Some(project) => Ok(ProjectAuth { project }),
                None => {
                    tracing::debug!("Rejected unknown secret key");
                    Err(AppError::Auth("Invalid API key".to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_secret_key_accepted() {
        let key = api_key_from_headers(&headers("authorization", "Bearer sk_live_123")).unwrap();
        assert_eq!(key, "sk_live_123");
    }

    #[test]
    fn test_x_api_key_accepted() {
        let key = api_key_from_headers(&headers("x-api-key", "sk_abc")).unwrap();
        assert_eq!(key, "sk_abc");
    }

    #[test]
    fn test_public_key_rejected() {
        let result = api_key_from_headers(&headers("authorization", "Bearer pk_abc"));
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(matches!(
            api_key_from_headers(&HeaderMap::new()),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            api_key_from_headers(&headers("authorization", "Bearer ")),
            Err(AppError::Auth(_))
        ));
    }

    #[test]
    fn test_non_bearer_scheme_rejected() {
        let result = api_key_from_headers(&headers("authorization", "Basic sk_abc"));
        assert!(matches!(result, Err(AppError::Auth(_))));
    }
}
