use crate::tracing::{scope_request_id, RequestId};
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The caller's `x-request-id` if it is usable, otherwise a fresh UUID
fn incoming_or_new(headers: &HeaderMap) -> (RequestId, Option<HeaderValue>) {
    let supplied = headers
        .get(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.to_str().ok().map(|s| (RequestId::new(s), v.clone())));

    match supplied {
        Some((id, value)) => (id, Some(value)),
        None => {
            let id = RequestId::default();
            let value = HeaderValue::from_str(id.as_str()).ok();
            (id, value)
        }
    }
}

/// Tags the request with a [`RequestId`].
///
/// The id is stored as an extension, scoped for [`crate::tracing::current_request_id`]
/// (so error bodies can echo it) and copied onto the response header.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let header = HeaderName::from_static(REQUEST_ID_HEADER);
    let (request_id, value) = incoming_or_new(request.headers());

    if let Some(v) = &value {
        request.headers_mut().insert(header.clone(), v.clone());
    }
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!("request", request_id = %request_id, method = %request.method());
    let mut response = scope_request_id(request_id, next.run(request))
        .instrument(span)
        .await;

    if let Some(v) = value {
        response.headers_mut().insert(header, v);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn echo_router() -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(id): Extension<RequestId>| async move {
                    let scoped = crate::tracing::current_request_id();
                    format!("{}|{}", id, scoped.map(|s| s.0).unwrap_or_default())
                }),
            )
            .layer(axum::middleware::from_fn(request_id_middleware))
    }

    async fn call(request_id: Option<&str>) -> (Option<String>, String) {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(id) = request_id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        let response = echo_router()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .map(|v| v.to_str().unwrap().to_owned());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (header, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn generates_an_id_when_none_is_sent() {
        let (header, body) = call(None).await;
        let header = header.unwrap();
        assert!(uuid::Uuid::parse_str(&header).is_ok());
        assert_eq!(body, format!("{header}|{header}"));
    }

    #[tokio::test]
    async fn keeps_the_callers_id() {
        let (header, body) = call(Some("checkout-42")).await;
        assert_eq!(header.as_deref(), Some("checkout-42"));
        assert_eq!(body, "checkout-42|checkout-42");
    }

    #[tokio::test]
    async fn replaces_an_empty_id() {
        let (header, _) = call(Some("")).await;
        assert!(header.is_some_and(|h| !h.is_empty()));
    }
}
