//! Listener capability traits implemented by plugins.

use crate::envelope::{ProxyRequest, ProxyResponse};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a listener callback. Plugin errors are opaque to the proxy.
pub type ListenerResult = anyhow::Result<()>;

/// Concrete type name of a listener, used for failure attribution.
///
/// Blanket-implemented for every sized type, so trait objects whose trait
/// extends this one report the name of the type behind the pointer. Call it
/// on the pointee (`&*arc`), not on the `Arc` itself.
pub trait ListenerType {
    fn listener_type(&self) -> &'static str;
}

impl<T> ListenerType for T {
    fn listener_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Handler for the four per-transaction interception points.
///
/// Every callback defaults to a no-op so a plugin only overrides the phases
/// it cares about.
pub trait ProxyListener: ListenerType + Send + Sync {
    fn on_client_to_proxy_request(&self, _request: &mut ProxyRequest) -> ListenerResult {
        Ok(())
    }

    fn on_proxy_to_server_request(&self, _request: &mut ProxyRequest) -> ListenerResult {
        Ok(())
    }

    fn on_server_to_proxy_response(&self, _response: &mut ProxyResponse) -> ListenerResult {
        Ok(())
    }

    fn on_proxy_to_client_response(&self, _response: &mut ProxyResponse) -> ListenerResult {
        Ok(())
    }
}

/// Lifecycle state of the proxy server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    NotRunning,
    Starting,
    Running,
    Stopping,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::NotRunning => "not_running",
            ProxyStatus::Starting => "starting",
            ProxyStatus::Running => "running",
            ProxyStatus::Stopping => "stopping",
        }
    }

    /// Whether the server may move from `self` to `next`.
    pub fn can_transition_to(&self, next: ProxyStatus) -> bool {
        matches!(
            (self, next),
            (ProxyStatus::NotRunning, ProxyStatus::Starting)
                | (ProxyStatus::Starting, ProxyStatus::Running)
                | (ProxyStatus::Starting, ProxyStatus::NotRunning)
                | (ProxyStatus::Running, ProxyStatus::Stopping)
                | (ProxyStatus::Stopping, ProxyStatus::NotRunning)
        )
    }
}

impl Default for ProxyStatus {
    fn default() -> Self {
        ProxyStatus::NotRunning
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler for server status transitions.
pub trait ServerListener: ListenerType + Send + Sync {
    /// Called before the server switches to `status`.
    fn before_status_changed(&self, _status: ProxyStatus) -> ListenerResult {
        Ok(())
    }

    /// Called once the server has switched to `status`.
    fn on_status_changed(&self, _status: ProxyStatus) -> ListenerResult {
        Ok(())
    }
}
