//! Fault-isolating fan-out of proxy and server events.
//!
//! Every listener callback runs inside a guarded call: an `Err` return or a
//! panic is turned into a [`ListenerFailure`], handed to the diagnostics sink,
//! and the fan-out continues with the next listener and the same envelope.
//! Nothing a listener does can make `dispatch` fail.

use crate::config::DispatcherConfig;
use crate::diagnostics::{
    Callback, DiagnosticsSink, FailureCause, ListenerFailure, TracingDiagnosticsSink,
};
use crate::envelope::{EventKind, ProxyEvent, ProxyRequest, ProxyResponse};
use crate::listener::{ListenerResult, ProxyListener, ProxyStatus, ServerListener};
use crate::registry::{ListenerRegistration, ListenerRegistry};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Outcome of one fan-out. Informational only; failures were already
/// reported to the diagnostics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub callback: Callback,
    /// Listeners whose callback was invoked.
    pub invoked: usize,
    /// Invoked listeners that returned an error or panicked.
    pub failed: usize,
}

impl DispatchSummary {
    fn new(callback: Callback) -> Self {
        Self {
            callback,
            invoked: 0,
            failed: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Proxy event kind, or `None` for status fan-outs.
    pub fn event_kind(&self) -> Option<EventKind> {
        match self.callback {
            Callback::Proxy(kind) => Some(kind),
            _ => None,
        }
    }

    fn record(&mut self, ok: bool) {
        self.invoked += 1;
        if !ok {
            self.failed += 1;
        }
    }
}

/// Drop a caught panic payload whose own `Drop` may panic.
///
/// A payload raised while dropping the first one is leaked rather than dropped.
fn discard_panic_payload(payload: Box<dyn Any + Send>) {
    if let Err(nested) = panic::catch_unwind(AssertUnwindSafe(move || drop(payload))) {
        std::mem::forget(nested);
    }
}

/// Run one listener callback, containing errors and panics.
///
/// Returns `true` when the callback completed with `Ok`.
fn guarded_call<L, F>(
    registration: &ListenerRegistration<L>,
    callback: Callback,
    sink: &dyn DiagnosticsSink,
    slow_threshold: Option<Duration>,
    call: F,
) -> bool
where
    L: ?Sized,
    F: FnOnce() -> ListenerResult,
{
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(call));

    if let Some(threshold) = slow_threshold {
        let elapsed = started.elapsed();
        if elapsed > threshold {
            warn!(
                plugin = registration.owner_plugin_id(),
                listener = registration.listener_type(),
                priority = %registration.priority(),
                callback = %callback,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX),
                "slow listener"
            );
        }
    }

    let cause = match outcome {
        Ok(Ok(())) => return true,
        Ok(Err(err)) => FailureCause::from_error(&err),
        Err(payload) => {
            let cause = FailureCause::from_panic(&*payload);
            discard_panic_payload(payload);
            cause
        }
    };
    let failure = ListenerFailure::new(
        registration.owner_plugin_id(),
        registration.listener_type(),
        registration.priority(),
        callback,
        cause,
    );
    if panic::catch_unwind(AssertUnwindSafe(|| sink.report(&failure))).is_err() {
        tracing::error!(
            plugin = registration.owner_plugin_id(),
            listener = registration.listener_type(),
            "diagnostics sink panicked while reporting a listener failure"
        );
    }
    false
}

/// Delivers the four proxy events to every registered [`ProxyListener`].
///
/// Safe to share across connection-handling threads; each call works on its
/// own envelope and its own registry snapshot.
pub struct EventDispatcher {
    registry: Arc<ListenerRegistry<dyn ProxyListener>>,
    sink: Arc<dyn DiagnosticsSink>,
    enabled: AtomicBool,
    slow_listener_threshold: Option<Duration>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<ListenerRegistry<dyn ProxyListener>>) -> Self {
        Self {
            registry,
            sink: Arc::new(TracingDiagnosticsSink),
            enabled: AtomicBool::new(true),
            slow_listener_threshold: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: &DispatcherConfig) -> Self {
        self.enabled = AtomicBool::new(config.enabled);
        self.slow_listener_threshold = config.slow_listener_threshold();
        self
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry<dyn ProxyListener>> {
        &self.registry
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Deliver `event` to every listener of the current snapshot, in order.
    pub fn dispatch(&self, mut event: ProxyEvent<'_>) -> DispatchSummary {
        let kind = event.kind();
        let callback = Callback::Proxy(kind);
        let mut summary = DispatchSummary::new(callback);
        if !self.is_enabled() {
            return summary;
        }

        let snapshot = self.registry.snapshot();
        for registration in &snapshot {
            let listener = registration.listener();
            let ok = guarded_call(
                &**registration,
                callback,
                &*self.sink,
                self.slow_listener_threshold,
                || match &mut event {
                    ProxyEvent::ClientToProxyRequest(request) => {
                        listener.on_client_to_proxy_request(request)
                    }
                    ProxyEvent::ProxyToServerRequest(request) => {
                        listener.on_proxy_to_server_request(request)
                    }
                    ProxyEvent::ServerToProxyResponse(response) => {
                        listener.on_server_to_proxy_response(response)
                    }
                    ProxyEvent::ProxyToClientResponse(response) => {
                        listener.on_proxy_to_client_response(response)
                    }
                },
            );
            summary.record(ok);
        }

        trace!(
            event = kind.as_str(),
            invoked = summary.invoked,
            failed = summary.failed,
            "event dispatched"
        );
        summary
    }

    pub fn client_to_proxy_request(&self, request: &mut ProxyRequest) -> DispatchSummary {
        self.dispatch(ProxyEvent::ClientToProxyRequest(request))
    }

    pub fn proxy_to_server_request(&self, request: &mut ProxyRequest) -> DispatchSummary {
        self.dispatch(ProxyEvent::ProxyToServerRequest(request))
    }

    pub fn server_to_proxy_response(&self, response: &mut ProxyResponse) -> DispatchSummary {
        self.dispatch(ProxyEvent::ServerToProxyResponse(response))
    }

    pub fn proxy_to_client_response(&self, response: &mut ProxyResponse) -> DispatchSummary {
        self.dispatch(ProxyEvent::ProxyToClientResponse(response))
    }
}

/// The dispatcher is itself a listener, so the engine can hold it wherever a
/// single listener is expected. Its callbacks never fail.
///
/// Do not register a dispatcher into its own registry.
impl ProxyListener for EventDispatcher {
    fn on_client_to_proxy_request(&self, request: &mut ProxyRequest) -> ListenerResult {
        self.client_to_proxy_request(request);
        Ok(())
    }

    fn on_proxy_to_server_request(&self, request: &mut ProxyRequest) -> ListenerResult {
        self.proxy_to_server_request(request);
        Ok(())
    }

    fn on_server_to_proxy_response(&self, response: &mut ProxyResponse) -> ListenerResult {
        self.server_to_proxy_response(response);
        Ok(())
    }

    fn on_proxy_to_client_response(&self, response: &mut ProxyResponse) -> ListenerResult {
        self.proxy_to_client_response(response);
        Ok(())
    }
}

/// Delivers server status transitions to every registered [`ServerListener`].
pub struct StatusDispatcher {
    registry: Arc<ListenerRegistry<dyn ServerListener>>,
    sink: Arc<dyn DiagnosticsSink>,
    slow_listener_threshold: Option<Duration>,
}

impl StatusDispatcher {
    pub fn new(registry: Arc<ListenerRegistry<dyn ServerListener>>) -> Self {
        Self {
            registry,
            sink: Arc::new(TracingDiagnosticsSink),
            slow_listener_threshold: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: &DispatcherConfig) -> Self {
        self.slow_listener_threshold = config.slow_listener_threshold();
        self
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry<dyn ServerListener>> {
        &self.registry
    }

    pub fn before_status_changed(&self, status: ProxyStatus) -> DispatchSummary {
        self.fan_out(Callback::BeforeStatusChanged(status), |l| {
            l.before_status_changed(status)
        })
    }

    pub fn on_status_changed(&self, status: ProxyStatus) -> DispatchSummary {
        self.fan_out(Callback::StatusChanged(status), |l| l.on_status_changed(status))
    }

    fn fan_out<F>(&self, callback: Callback, call: F) -> DispatchSummary
    where
        F: Fn(&dyn ServerListener) -> ListenerResult,
    {
        let mut summary = DispatchSummary::new(callback);
        let snapshot = self.registry.snapshot();
        for registration in &snapshot {
            let listener = registration.listener();
            let ok = guarded_call(
                &**registration,
                callback,
                &*self.sink,
                self.slow_listener_threshold,
                || call(&**listener),
            );
            summary.record(ok);
        }
        summary
    }
}
