//! Explicitly owned home of the listener registries and dispatchers.
//!
//! A [`ListenerHub`] is created when the proxy starts and torn down when it
//! stops. The plugin lifecycle subsystem registers and unregisters listeners
//! through it; the interception engine holds its [`EventDispatcher`].

use crate::config::DispatcherConfig;
use crate::diagnostics::{DiagnosticsSink, TracingDiagnosticsSink};
use crate::dispatcher::{DispatchSummary, EventDispatcher, StatusDispatcher};
use crate::listener::{ProxyListener, ProxyStatus, ServerListener};
use crate::priority::ListenerPriority;
use crate::registry::ListenerRegistry;
use crate::{Error, Result};
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

pub struct ListenerHub {
    proxy_listeners: Arc<ListenerRegistry<dyn ProxyListener>>,
    server_listeners: Arc<ListenerRegistry<dyn ServerListener>>,
    dispatcher: Arc<EventDispatcher>,
    status_dispatcher: StatusDispatcher,
    status: RwLock<ProxyStatus>,
    // Serializes status transitions; never held by readers of `status`.
    transition: Mutex<()>,
}

impl ListenerHub {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingDiagnosticsSink))
    }

    pub fn with_sink(config: &DispatcherConfig, sink: Arc<dyn DiagnosticsSink>) -> Self {
        let proxy_listeners = Arc::new(ListenerRegistry::<dyn ProxyListener>::new());
        let server_listeners = Arc::new(ListenerRegistry::<dyn ServerListener>::new());
        let dispatcher = EventDispatcher::new(proxy_listeners.clone())
            .with_sink(sink.clone())
            .with_config(config);
        let status_dispatcher = StatusDispatcher::new(server_listeners.clone())
            .with_sink(sink)
            .with_config(config);
        Self {
            proxy_listeners,
            server_listeners,
            dispatcher: Arc::new(dispatcher),
            status_dispatcher,
            status: RwLock::new(ProxyStatus::NotRunning),
            transition: Mutex::new(()),
        }
    }

    /// Dispatcher to hand to the interception engine.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn proxy_listeners(&self) -> &Arc<ListenerRegistry<dyn ProxyListener>> {
        &self.proxy_listeners
    }

    pub fn server_listeners(&self) -> &Arc<ListenerRegistry<dyn ServerListener>> {
        &self.server_listeners
    }

    pub fn register_listener(
        &self,
        listener: Arc<dyn ProxyListener>,
        plugin_id: impl Into<String>,
        priority: ListenerPriority,
    ) -> bool {
        self.proxy_listeners.register(listener, plugin_id, priority)
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn ProxyListener>) -> bool {
        self.proxy_listeners.unregister(listener)
    }

    pub fn register_server_listener(
        &self,
        listener: Arc<dyn ServerListener>,
        plugin_id: impl Into<String>,
        priority: ListenerPriority,
    ) -> bool {
        self.server_listeners.register(listener, plugin_id, priority)
    }

    pub fn unregister_server_listener(&self, listener: &Arc<dyn ServerListener>) -> bool {
        self.server_listeners.unregister(listener)
    }

    /// Drop every listener a plugin registered; returns how many were removed.
    pub fn unload_plugin(&self, plugin_id: &str) -> usize {
        let removed = self.proxy_listeners.unregister_plugin(plugin_id)
            + self.server_listeners.unregister_plugin(plugin_id);
        info!(plugin = plugin_id, removed, "plugin unloaded");
        removed
    }

    pub fn status(&self) -> ProxyStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Move the server to `next`, notifying server listeners before and after.
    ///
    /// Listener failures do not block the transition. Must not be called from
    /// inside a server listener.
    pub fn transition(&self, next: ProxyStatus) -> Result<(DispatchSummary, DispatchSummary)> {
        let _guard = self.transition.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.status();
        if !current.can_transition_to(next) {
            return Err(Error::StatusTransition {
                from: current,
                to: next,
            });
        }

        let before = self.status_dispatcher.before_status_changed(next);
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = next;
        let after = self.status_dispatcher.on_status_changed(next);

        info!(from = %current, to = %next, "proxy status changed");
        Ok((before, after))
    }

    /// Stop (if running) and drop every registration.
    pub fn shutdown(&self) -> Result<usize> {
        match self.status() {
            ProxyStatus::Running => {
                self.transition(ProxyStatus::Stopping)?;
                self.transition(ProxyStatus::NotRunning)?;
            }
            ProxyStatus::Starting | ProxyStatus::Stopping => {
                self.transition(ProxyStatus::NotRunning)?;
            }
            ProxyStatus::NotRunning => {}
        }
        let cleared = self.proxy_listeners.clear() + self.server_listeners.clear();
        info!(cleared, "listener hub shut down");
        Ok(cleared)
    }
}

impl Default for ListenerHub {
    fn default() -> Self {
        Self::new(&DispatcherConfig::default())
    }
}
