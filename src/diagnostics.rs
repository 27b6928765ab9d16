//! Listener failure reports and the sinks they are routed to.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ListenerFailure`] | Attributed report for one isolated listener failure |
//! | [`DiagnosticsSink`] | Trait for report destinations |
//! | [`TracingDiagnosticsSink`] | Default sink, emits a structured `tracing` error event |
//! | [`InMemoryDiagnosticsSink`] | Bounded in-memory sink for tests and UIs |
//! | [`CompositeDiagnosticsSink`] | Fans a report out to several sinks |

use crate::envelope::EventKind;
use crate::listener::ProxyStatus;
use crate::priority::ListenerPriority;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Which listener callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Callback {
    Proxy(EventKind),
    BeforeStatusChanged(ProxyStatus),
    StatusChanged(ProxyStatus),
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Proxy(kind) => f.write_str(kind.as_str()),
            Callback::BeforeStatusChanged(s) => write!(f, "before_status_changed({})", s),
            Callback::StatusChanged(s) => write!(f, "status_changed({})", s),
        }
    }
}

/// How a listener callback failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureCause {
    /// The callback returned an error.
    Error(String),
    /// The callback panicked; holds the panic payload when it was a string.
    Panic(String),
}

impl FailureCause {
    pub(crate) fn from_error(err: &anyhow::Error) -> Self {
        // `{:#}` keeps the context chain on one line.
        FailureCause::Error(format!("{:#}", err))
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        FailureCause::Panic(message)
    }

    pub fn message(&self) -> &str {
        match self {
            FailureCause::Error(m) | FailureCause::Panic(m) => m,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, FailureCause::Panic(_))
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Error(m) => f.write_str(m),
            FailureCause::Panic(m) => write!(f, "panicked: {}", m),
        }
    }
}

/// Attributed report for one listener failure that the dispatcher contained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerFailure {
    pub owner_plugin_id: String,
    pub listener_type: String,
    pub priority: ListenerPriority,
    pub callback: Callback,
    pub cause: FailureCause,
    pub timestamp: f64,
}

impl ListenerFailure {
    pub fn new(
        owner_plugin_id: impl Into<String>,
        listener_type: impl Into<String>,
        priority: ListenerPriority,
        callback: Callback,
        cause: FailureCause,
    ) -> Self {
        Self {
            owner_plugin_id: owner_plugin_id.into(),
            listener_type: listener_type.into(),
            priority,
            callback,
            cause,
            timestamp: timestamp(),
        }
    }

    /// Unqualified listener type name (`my_plugin::Blocker` -> `Blocker`).
    pub fn listener_short_type(&self) -> &str {
        let base = self
            .listener_type
            .split('<')
            .next()
            .unwrap_or(&self.listener_type);
        match base.rfind("::") {
            Some(idx) => &self.listener_type[idx + 2..],
            None => &self.listener_type,
        }
    }
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listener of plugin '{}' failed during {} [type={}, priority={}]: {}",
            self.owner_plugin_id,
            self.callback,
            self.listener_short_type(),
            self.priority,
            self.cause
        )
    }
}

/// Destination for listener failure reports.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, failure: &ListenerFailure);
}

/// Default sink: one `tracing` error event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnosticsSink;

impl DiagnosticsSink for TracingDiagnosticsSink {
    fn report(&self, failure: &ListenerFailure) {
        tracing::error!(
            plugin = failure.owner_plugin_id.as_str(),
            listener = failure.listener_type.as_str(),
            priority = %failure.priority,
            callback = %failure.callback,
            panicked = failure.cause.is_panic(),
            error = failure.cause.message(),
            "listener failed; continuing dispatch"
        );
    }
}

/// Bounded in-memory sink; oldest reports are dropped first.
pub struct InMemoryDiagnosticsSink {
    failures: RwLock<Vec<ListenerFailure>>,
    max_failures: usize,
}

impl InMemoryDiagnosticsSink {
    pub fn new(max: usize) -> Self {
        Self {
            failures: RwLock::new(Vec::new()),
            max_failures: max,
        }
    }

    pub fn failures(&self) -> Vec<ListenerFailure> {
        self.failures
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    pub fn failures_by_plugin(&self, plugin_id: &str) -> Vec<ListenerFailure> {
        self.failures()
            .into_iter()
            .filter(|f| f.owner_plugin_id == plugin_id)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut f) = self.failures.write() {
            f.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.failures.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryDiagnosticsSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl DiagnosticsSink for InMemoryDiagnosticsSink {
    fn report(&self, failure: &ListenerFailure) {
        if let Ok(mut failures) = self.failures.write() {
            failures.push(failure.clone());
            if failures.len() > self.max_failures {
                failures.remove(0);
            }
        }
    }
}

/// Composite sink for multiple destinations.
#[derive(Default)]
pub struct CompositeDiagnosticsSink {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl CompositeDiagnosticsSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DiagnosticsSink for CompositeDiagnosticsSink {
    fn report(&self, failure: &ListenerFailure) {
        for sink in &self.sinks {
            sink.report(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(plugin: &str) -> ListenerFailure {
        ListenerFailure::new(
            plugin,
            "my_plugin::filters::HostBlocker",
            ListenerPriority::High,
            Callback::Proxy(EventKind::ClientToProxyRequest),
            FailureCause::Error("boom".into()),
        )
    }

    #[test]
    fn display_names_plugin_type_and_priority() {
        let text = failure("adblock").to_string();
        assert_eq!(
            text,
            "listener of plugin 'adblock' failed during client_to_proxy_request \
             [type=HostBlocker, priority=high]: boom"
        );
    }

    #[test]
    fn short_type_ignores_generic_paths() {
        let mut f = failure("p");
        f.listener_type = "crate::Wrapper<other::Inner>".into();
        assert_eq!(f.listener_short_type(), "Wrapper<other::Inner>");
        f.listener_type = "Plain".into();
        assert_eq!(f.listener_short_type(), "Plain");
    }

    #[test]
    fn panic_payloads_are_captured() {
        let p: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(FailureCause::from_panic(&*p), FailureCause::Panic("static message".into()));
        let p: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(FailureCause::from_panic(&*p).message(), "owned message");
        let p: Box<dyn Any + Send> = Box::new(42u8);
        assert!(FailureCause::from_panic(&*p).is_panic());
    }

    #[test]
    fn error_cause_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("writing capture");
        assert_eq!(
            FailureCause::from_error(&err).message(),
            "writing capture: disk full"
        );
    }

    #[test]
    fn in_memory_sink_is_bounded() {
        let sink = InMemoryDiagnosticsSink::new(2);
        sink.report(&failure("a"));
        sink.report(&failure("b"));
        sink.report(&failure("c"));
        assert_eq!(sink.len(), 2);
        assert!(sink.failures_by_plugin("a").is_empty());
        assert_eq!(sink.failures_by_plugin("c").len(), 1);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn composite_sink_fans_out() {
        let a = Arc::new(InMemoryDiagnosticsSink::default());
        let b = Arc::new(InMemoryDiagnosticsSink::default());
        let composite = CompositeDiagnosticsSink::new()
            .add_sink(a.clone())
            .add_sink(b.clone())
            .add_sink(Arc::new(TracingDiagnosticsSink));
        composite.report(&failure("x"));
        assert_eq!(composite.len(), 3);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn report_serializes_attribution() {
        let json = serde_json::to_value(failure("adblock")).unwrap();
        assert_eq!(json["owner_plugin_id"], "adblock");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["callback"]["kind"], "proxy");
        assert_eq!(json["callback"]["value"], "client_to_proxy_request");
        assert_eq!(json["cause"]["kind"], "error");
    }
}
