//! Subscriber layer that turns error events into queued failure reports

use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::{classify, phase_for, Callsite, Envelope, FailureReport, REPORT_TARGET};

/// Targets whose errors are internal protocol chatter, not job failures.
const PROTOCOL_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "rustls", "tower"];

/// Span field marking a request-scoped operation.
const REQUEST_ID_FIELD: &str = "request_id";

/// Event field that explicitly marks protocol-layer noise.
const PROTOCOL_NOISE_FIELD: &str = "protocol_noise";

/// Span extension set on spans that carry a request identifier.
struct RequestScoped;

/// Classifies error-level events and queues them for the reporting worker
///
/// The layer only observes: formatting layers stacked beside it still print
/// every event unchanged.
pub struct FailureReportLayer {
    tx: mpsc::Sender<Envelope>,
    endpoint: String,
    dropped: Arc<AtomicU64>,
}

impl FailureReportLayer {
    pub(crate) fn new(
        tx: mpsc::Sender<Envelope>,
        endpoint: String,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tx,
            endpoint,
            dropped,
        }
    }

    fn is_protocol_target(target: &str) -> bool {
        let root = target.split("::").next().unwrap_or(target);
        PROTOCOL_TARGETS.contains(&root)
    }

    fn build_report(&self, event: &Event<'_>, fields: FieldCollector) -> FailureReport {
        let metadata = event.metadata();

        let mut message = fields.message.unwrap_or_default();
        if let Some(Value::String(error)) = fields.context.get("error") {
            if message.is_empty() {
                message = error.clone();
            } else if !message.contains(error.as_str()) {
                message = format!("{}: {}", message, error);
            }
        }
        if message.is_empty() {
            message = metadata.name().to_string();
        }

        let phase_source = metadata
            .module_path()
            .or(metadata.file())
            .unwrap_or(metadata.target());

        FailureReport {
            endpoint: self.endpoint.clone(),
            severity: classify(&message),
            phase: phase_for(phase_source),
            message,
            callsite: Callsite {
                file: metadata.file().map(str::to_string),
                line: metadata.line(),
                module: metadata.module_path().map(str::to_string),
            },
            timestamp: Utc::now(),
            context: fields.context,
        }
    }
}

impl<S> Layer<S> for FailureReportLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        attrs.record(&mut visitor);
        if visitor.found {
            mark_request_scoped(id, &ctx);
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        values.record(&mut visitor);
        if visitor.found {
            mark_request_scoped(id, &ctx);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR {
            return;
        }

        let target = metadata.target();
        if target == REPORT_TARGET || Self::is_protocol_target(target) {
            return;
        }

        if let Some(scope) = ctx.event_scope(event) {
            if scope
                .from_root()
                .any(|span| span.extensions().get::<RequestScoped>().is_some())
            {
                return;
            }
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        if fields.protocol_noise {
            return;
        }

        let report = self.build_report(event, fields);
        match self.tx.try_send(Envelope::Report(Box::new(report))) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            },
            Err(TrySendError::Closed(_)) => {},
        }
    }
}

fn mark_request_scoped<S>(id: &span::Id, ctx: &Context<'_, S>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(span) = ctx.span(id) {
        let mut extensions = span.extensions_mut();
        if extensions.get_mut::<RequestScoped>().is_none() {
            extensions.insert(RequestScoped);
        }
    }
}

#[derive(Default)]
struct RequestIdVisitor {
    found: bool,
}

impl Visit for RequestIdVisitor {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        if field.name() == REQUEST_ID_FIELD {
            self.found = true;
        }
    }
}

/// Collects the message and every structured field of an event
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    context: serde_json::Map<String, Value>,
    protocol_noise: bool,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        self.context.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::from(value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == PROTOCOL_NOISE_FIELD {
            self.protocol_noise = value;
        }
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.insert(field, Value::from(rendered));
        }
    }
}
