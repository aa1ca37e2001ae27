//! HTTP adapter for the Tessera token store.
//!
//! The [`authorize`] middleware reads the `Authorization: Bearer …` header,
//! verifies the string token against the store, and attaches an
//! [`AuthResult`] to the request extensions — either the verified
//! [`Token`] or an [`AuthError`] carrying the HTTP status it maps to. The
//! inner handler always runs and decides what a failure means for its
//! route; on failure the original `Authorization` header is echoed on the
//! response.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, AUTHORIZATION};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use tessera_core::{Store, StoreError, Token};

/// The authorization outcome attached to request extensions by
/// [`authorize`].
#[derive(Debug, Clone)]
pub struct AuthResult(pub Result<Token, AuthError>);

impl AuthResult {
    /// The verified token, if authorization succeeded.
    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.0.as_ref().ok()
    }

    /// The failure, if authorization failed.
    #[must_use]
    pub fn error(&self) -> Option<&AuthError> {
        self.0.as_ref().err()
    }
}

/// An authorization failure and the HTTP status it maps to.
#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: StatusCode,
    pub message: String,
}

impl AuthError {
    fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Middleware verifying the `Authorization` header against the store.
///
/// Use with `axum::middleware::from_fn_with_state(store, authorize)`.
pub async fn authorize(
    State(store): State<Arc<Store>>,
    mut req: Request,
    next: Next,
) -> Response {
    match process_auth_header(&store, req.headers(), req.extensions()).await {
        Ok(token) => {
            req.extensions_mut().insert(AuthResult(Ok(token)));
            next.run(req).await
        }
        Err(err) => {
            debug!(code = %err.code, message = %err.message, "authorization failed");
            let echo = req.headers().get(AUTHORIZATION).cloned();
            req.extensions_mut().insert(AuthResult(Err(err)));

            let mut res = next.run(req).await;
            if let Some(value) = echo {
                res.headers_mut().insert(AUTHORIZATION, value);
            }
            res
        }
    }
}

async fn process_auth_header(
    store: &Store,
    headers: &header::HeaderMap,
    extensions: &axum::http::Extensions,
) -> Result<Token, AuthError> {
    if !store.has_backend() {
        return Err(AuthError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service unavailable (auth/storage)",
        ));
    }
    if !store.has_serializer() {
        return Err(AuthError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service unavailable (auth/serializer)",
        ));
    }

    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if value.is_empty() {
        return Err(AuthError::new(
            StatusCode::UNAUTHORIZED,
            "no \"Authorization\" header",
        ));
    }
    let Some(s) = value.strip_prefix("Bearer ") else {
        return Err(AuthError::new(
            StatusCode::UNAUTHORIZED,
            "malformed \"Authorization\" header",
        ));
    };
    let token = s.to_string();

    // The connect address is used directly; behind a proxy a wrapping layer
    // must rewrite it from X-Forwarded-For or similar first.
    let remote_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_default();
    let referer = header_str(headers, header::REFERER).to_string();
    let origin = header_str(headers, header::ORIGIN).to_string();
    let user_agent = header_str(headers, header::USER_AGENT).to_string();

    store
        .access(&token, &remote_addr, &referer, &origin, &user_agent)
        .await
        .map_err(auth_error)
}

fn header_str<'a>(headers: &'a header::HeaderMap, name: header::HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn auth_error(err: StoreError) -> AuthError {
    match err {
        StoreError::Unregistered => AuthError::new(
            StatusCode::UNAUTHORIZED,
            "authorization token revoked or unregistered",
        ),
        StoreError::Validation(err) if err.is_expired() => {
            AuthError::new(StatusCode::UNAUTHORIZED, "authorization token expired")
        }
        StoreError::Validation(err) if err.is_not_before() => AuthError::new(
            StatusCode::UNAUTHORIZED,
            "authorization token used before its not-before time",
        ),
        StoreError::Validation(_) => {
            AuthError::new(StatusCode::UNAUTHORIZED, "authorization token invalid")
        }
        err @ (StoreError::Serializer(_) | StoreError::Codec(_)) => {
            AuthError::new(StatusCode::UNAUTHORIZED, format!("bad authorization ({err})"))
        }
        StoreError::NoBackend => AuthError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service unavailable (auth/storage)",
        ),
        StoreError::NoSerializer => AuthError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service unavailable (auth/serializer)",
        ),
        err @ (StoreError::Backend(_) | StoreError::MapSize | StoreError::MapValues) => {
            AuthError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("storage error ({err})"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use http_body_util::BodyExt as _;
    use tessera_core::SignMethod;
    use tessera_storage::MemoryBackend;
    use tower::ServiceExt as _;

    use super::*;

    async fn handler(Extension(auth): Extension<AuthResult>) -> Response {
        match auth.0 {
            Ok(token) => (StatusCode::OK, token.subject.to_string()).into_response(),
            Err(err) => (err.code, err.message).into_response(),
        }
    }

    fn router(store: Arc<Store>) -> Router {
        Router::new()
            .route("/", get(handler))
            .layer(middleware::from_fn_with_state::<_, _, (State<Arc<Store>>, Request)>(
                store, authorize,
            ))
    }

    fn unsigned_store() -> Store {
        let mut store = Store::new(Some(Arc::new(MemoryBackend::new())), None);
        store
            .use_serializer(SignMethod::None, None, None)
            .expect("serializer");
        store
    }

    fn bearer_request(s: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri("/")
            .header(AUTHORIZATION, format!("Bearer {s}"))
            .header(header::USER_AGENT, "Mozilla/5.0")
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn valid_bearer_token_reaches_handler() {
        let store = Arc::new(unsigned_store());
        let subject = uuid::Uuid::new_v4();
        let s = store
            .issue(subject, chrono::Duration::zero(), "", "", "", "")
            .await
            .expect("issue");

        let res = router(store).oneshot(bearer_request(&s)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, subject.to_string().as_bytes());
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_and_header_echoed() {
        let store = Arc::new(unsigned_store());
        let s = store
            .issue(uuid::Uuid::new_v4(), chrono::Duration::zero(), "", "", "", "")
            .await
            .expect("issue");
        let token = store.access(&s, "", "", "", "").await.expect("access");
        store.revoke(&token).await.expect("revoke");

        let res = router(store).oneshot(bearer_request(&s)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            res.headers().get(AUTHORIZATION).unwrap(),
            &format!("Bearer {s}")
        );
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let store = Arc::new(unsigned_store());
        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let res = router(store).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_header_is_unauthorized() {
        let store = Arc::new(unsigned_store());
        let req = HttpRequest::builder()
            .uri("/")
            .header(AUTHORIZATION, "Token abc")
            .body(Body::empty())
            .unwrap();
        let res = router(store).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unconfigured_store_is_service_unavailable() {
        let store = Arc::new(Store::new(None, None));
        let res = router(store).oneshot(bearer_request("auth.x")).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let store = Arc::new(unsigned_store());
        let res = router(store)
            .oneshot(bearer_request("not-a-token"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}

