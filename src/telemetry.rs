use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::OnceLock;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "armproxy";

pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("armproxy=info,info"));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    const fn new() -> Self {
        Self {
            service_name: SERVICE_NAME,
        }
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let pid = std::process::id().to_string();
        let metadata = event.metadata();
        let component = metadata.target();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let span_path = current_span_path(ctx);

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", self.service_name);
        push_field(&mut line, "component", component);
        push_field(&mut line, "pid", &pid);

        if let Some(span_path) = span_path {
            push_field(&mut line, "span", &span_path);
        }

        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

fn current_span_path<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    let span = ctx.lookup_current()?;
    let names: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("."))
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

/// Process-wide counters surfaced by the status endpoint.
#[derive(Default)]
pub struct RuntimeCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    upstream: UpstreamOutcomeRegistry,
    http_requests: HttpRequestRegistry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream: Vec<UpstreamOutcomeSnapshot>,
    pub http_requests: Vec<HttpRequestSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamOutcomeSnapshot {
    pub operation: String,
    pub success: u64,
    pub failure: u64,
    pub failures_by_kind: Vec<(String, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequestSnapshot {
    pub route: String,
    pub status_code: u16,
    pub total: u64,
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_success(&self, operation: &str) {
        self.upstream.record_success(operation);
    }

    pub fn record_upstream_failure(&self, operation: &str, kind: &str) {
        self.upstream.record_failure(operation, kind);
    }

    pub fn record_http_request(&self, route: &str, status: u16) {
        self.http_requests.record(route, status);
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream: self.upstream.snapshot(),
            http_requests: self.http_requests.snapshot(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct UpstreamOutcomeEntry {
    success: u64,
    failure: u64,
    failures_by_kind: BTreeMap<String, u64>,
}

#[derive(Default)]
struct UpstreamOutcomeRegistry {
    inner: Mutex<BTreeMap<String, UpstreamOutcomeEntry>>,
}

impl UpstreamOutcomeRegistry {
    fn record_success(&self, operation: &str) {
        let mut guard = self.inner.lock().expect("upstream outcome registry poisoned");
        let entry = guard.entry(operation.to_string()).or_default();
        entry.success = entry.success.saturating_add(1);
    }

    fn record_failure(&self, operation: &str, kind: &str) {
        let mut guard = self.inner.lock().expect("upstream outcome registry poisoned");
        let entry = guard.entry(operation.to_string()).or_default();
        entry.failure = entry.failure.saturating_add(1);
        *entry.failures_by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    fn snapshot(&self) -> Vec<UpstreamOutcomeSnapshot> {
        let guard = self.inner.lock().expect("upstream outcome registry poisoned");
        guard
            .iter()
            .map(|(operation, entry)| UpstreamOutcomeSnapshot {
                operation: operation.clone(),
                success: entry.success,
                failure: entry.failure,
                failures_by_kind: entry
                    .failures_by_kind
                    .iter()
                    .map(|(kind, count)| (kind.clone(), *count))
                    .collect(),
            })
            .collect()
    }
}

#[derive(Default)]
struct HttpRequestRegistry {
    inner: Mutex<BTreeMap<(String, u16), u64>>,
}

impl HttpRequestRegistry {
    fn record(&self, route: &str, status: u16) {
        let mut guard = self.inner.lock().expect("http request registry poisoned");
        *guard.entry((route.to_string(), status)).or_insert(0) += 1;
    }

    fn snapshot(&self) -> Vec<HttpRequestSnapshot> {
        let guard = self.inner.lock().expect("http request registry poisoned");
        guard
            .iter()
            .map(|((route, status), total)| HttpRequestSnapshot {
                route: route.clone(),
                status_code: *status,
                total: *total,
            })
            .collect()
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}
