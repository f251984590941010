use axum::{body::Body, http::Request};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, DefaultOnResponse, MakeSpan, TraceLayer,
};
use tracing::{Level, Span, error, info};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span),
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

#[derive(Clone, Debug, Default)]
pub(crate) struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let (request_id, client_ip) = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(
                || ("n/a".to_string(), "n/a".to_string()),
                |ctx| (ctx.request_id.clone(), ctx.client_ip.to_string()),
            );

        // Path only: the socket upgrade carries the bearer token in the query.
        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            client_ip = %client_ip,
        )
    }
}

pub(crate) fn on_request_handler(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        info!(
            method = %req.method(),
            path = %req.uri().path(),
            version = ?req.version(),
            "started processing request"
        );
    });
}

pub(crate) fn on_failure_handler(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(
            error = %error,
            latency = ?latency,
            "error processing request"
        );
    });
}

/// Create a trace layer for HTTP request logging
pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request_handler as fn(&Request<Body>, &Span))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(on_failure_handler as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::{
        io::{self, Write},
        net::IpAddr,
        sync::{Arc, Mutex},
    };
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture<F: FnOnce()>(body: F) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(Capture(buffer.clone()))
            .with_ansi(false)
            .with_max_level(Level::INFO)
            .finish();
        tracing::subscriber::with_default(subscriber, body);
        let bytes = buffer.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn span_carries_request_context_and_hides_query() {
        let mut request = Request::builder()
            .uri("/api/chat/ws?token=secret-token")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-42".to_string(),
            client_ip: "198.51.100.7".parse::<IpAddr>().unwrap(),
            claims: None,
        });

        let output = capture(|| {
            let span = HttpMakeSpan.make_span(&request);
            on_request_handler(&request, &span);
        });

        assert!(output.contains("req-42"));
        assert!(output.contains("198.51.100.7"));
        assert!(output.contains("/api/chat/ws"));
        assert!(!output.contains("secret-token"));
    }

    #[test]
    fn span_without_context_uses_placeholders() {
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let output = capture(|| {
            let span = HttpMakeSpan.make_span(&request);
            on_request_handler(&request, &span);
        });
        assert!(output.contains("n/a"));
    }

    #[test]
    fn failures_are_logged_at_error_level() {
        let output = capture(|| {
            let span = tracing::info_span!("test_span");
            on_failure_handler(
                ServerErrorsFailureClass::StatusCode(StatusCode::INTERNAL_SERVER_ERROR),
                Duration::from_millis(5),
                &span,
            );
        });
        assert!(output.contains("ERROR"));
        assert!(output.contains("error processing request"));
    }
}
