use axum::Router;
use axum::http::{HeaderMap, Request, Response, header};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{Span, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "rust_convert_backend=info,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn declared_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Wrap the router with one span per request, carrying the upload size and
/// the outgoing artifact type.
pub fn with_http_tracing(router: Router) -> Router {
    let layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "conversion_request",
                method = %request.method(),
                path = %request.uri().path(),
                upload_bytes = declared_length(request.headers()),
                artifact = tracing::field::Empty,
            )
        })
        .on_request(|request: &Request<_>, _span: &Span| {
            info!(
                "📥 {} {} ({} bytes)",
                request.method(),
                request.uri().path(),
                declared_length(request.headers())
            );
        })
        .on_response(|response: &Response<_>, latency: Duration, span: &Span| {
            let artifact = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none");
            span.record("artifact", artifact);

            let status = response.status();
            if status.is_server_error() {
                warn!("📤 {} after {:?}", status, latency);
            } else {
                info!("📤 {} after {:?} ({})", status, latency, artifact);
            }
        });

    router.layer(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_declared_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), 0);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("2048"));
        assert_eq!(declared_length(&headers), 2048);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(declared_length(&headers), 0);
    }
}
