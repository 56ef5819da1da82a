use std::fmt;
use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::field::Field;
use tracing::Instrument;
use tracing_subscriber::field::{RecordFields, Visit};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Wraps each request in a span carrying a fresh request id, and echoes
/// the id back in `x-request-id`.
pub async fn trace_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri().path(),
        request_id = %request_id,
    );

    async move {
        let mut response = next.run(request).await;
        tracing::info!(
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Installs the process-wide fmt subscriber. Filtering follows `RUST_LOG`,
/// defaulting to `info`.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .fmt_fields(ColoredFields)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Field formatter that colours the fields this gateway logs most.
pub struct ColoredFields;

impl<'writer> FormatFields<'writer> for ColoredFields {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'writer>, fields: R) -> fmt::Result {
        let mut visitor = ColoredFieldVisitor {
            writer,
            is_first: true,
            result: Ok(()),
        };
        fields.record(&mut visitor);
        visitor.result
    }
}

struct ColoredFieldVisitor<'writer> {
    writer: Writer<'writer>,
    is_first: bool,
    result: fmt::Result,
}

/// (key colour, value colour) as ANSI SGR parameters.
fn palette(name: &str) -> (&'static str, &'static str) {
    match name {
        "request_id" => ("38;2;255;105;180", "36"),
        "method" => ("1;33", "36"),
        "uri" => ("35", "1;36"),
        "status" => ("1;34", "1;37"),
        "latency_ms" => ("33", "32"),
        "chat_id" | "project_id" => ("34", "31"),
        _ => ("90", "37"),
    }
}

impl ColoredFieldVisitor<'_> {
    fn write_field(&mut self, field: &Field, value: &dyn fmt::Debug) -> fmt::Result {
        if !self.is_first {
            write!(self.writer, " ")?;
        }
        self.is_first = false;

        if field.name() == "message" {
            return write!(self.writer, "{value:?}");
        }
        if self.writer.has_ansi_escapes() {
            let (key, val) = palette(field.name());
            write!(
                self.writer,
                "\x1b[{key}m{}=\x1b[{val}m{value:?}\x1b[0m",
                field.name()
            )
        } else {
            write!(self.writer, "{}={value:?}", field.name())
        }
    }
}

impl Visit for ColoredFieldVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }
        self.result = self.write_field(field, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn(trace_requests));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert!(Uuid::parse_str(id.to_str().unwrap()).is_ok());
    }

    #[test]
    fn unknown_fields_use_the_default_palette() {
        assert_eq!(palette("whatever"), ("90", "37"));
        assert_ne!(palette("request_id"), palette("whatever"));
    }
}
