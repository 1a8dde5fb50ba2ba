//! Response headers for media that must not linger in caches.

use axum::{
    body::Body,
    http::{
        header::{CACHE_CONTROL, PRAGMA, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS},
        HeaderValue, Request,
    },
    middleware::Next,
    response::Response,
};

/// Mark every response as uncacheable.
///
/// Adds the following headers:
/// - Cache-Control: no-store
/// - Pragma: no-cache
/// - X-Content-Type-Options: nosniff
/// - Referrer-Policy: no-referrer
///
/// Download URLs carry the credential, so the referrer is never sent on.
pub async fn no_store_headers(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::util::ServiceExt;

    async fn cached_handler() -> ([(axum::http::HeaderName, &'static str); 1], &'static str) {
        ([(CACHE_CONTROL, "public, max-age=3600")], "media")
    }

    #[tokio::test]
    async fn test_headers_override_handler_cache_control() {
        let app = Router::new()
            .route("/", get(cached_handler))
            .layer(middleware::from_fn(no_store_headers));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(headers.get(PRAGMA).unwrap(), "no-cache");
        assert_eq!(headers.get(X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(headers.get(REFERRER_POLICY).unwrap(), "no-referrer");
    }
}
