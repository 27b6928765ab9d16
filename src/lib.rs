//! # proxy-dispatch
//!
//! Event-dispatch core of an intercepting HTTP/HTTPS proxy with third-party
//! plugins.
//!
//! ## Overview
//!
//! The interception engine raises four events per transaction
//! (client-to-proxy request, proxy-to-server request, server-to-proxy
//! response, proxy-to-client response). This crate owns the set of plugin
//! listeners, orders them by declared priority and delivers each event to all
//! of them, containing any listener error or panic so that one plugin cannot
//! stall or crash the proxy.
//!
//! ## Guarantees
//!
//! - **Ordering**: highest priority first; equal priorities run in
//!   registration order.
//! - **Fault isolation**: a failing listener is reported to a
//!   [`DiagnosticsSink`] and skipped; the remaining listeners still run.
//! - **Snapshot isolation**: each dispatch iterates an immutable snapshot;
//!   registrations made meanwhile show up in the next dispatch.
//! - **Lock-free reads**: snapshots never block, nor are blocked by, registry
//!   mutation.
//!
//! ## Quick Start
//!
//! ```rust
//! use proxy_dispatch::{
//!     DispatcherConfig, ListenerHub, ListenerPriority, ListenerResult, ProxyListener,
//!     ProxyRequest, ProxyResponse,
//! };
//! use std::sync::Arc;
//!
//! struct BlockAds;
//!
//! impl ProxyListener for BlockAds {
//!     fn on_client_to_proxy_request(&self, request: &mut ProxyRequest) -> ListenerResult {
//!         if request.host() == Some("ads.example") {
//!             request.set_response(ProxyResponse::new(http::StatusCode::FORBIDDEN));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let hub = ListenerHub::new(&DispatcherConfig::default());
//! hub.register_listener(Arc::new(BlockAds), "adblock", ListenerPriority::High);
//!
//! let mut request = ProxyRequest::get(http::Uri::from_static("http://ads.example/x.js"));
//! hub.dispatcher().client_to_proxy_request(&mut request);
//! assert!(request.is_short_circuited());
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`listener`] | Listener traits and proxy status |
//! | [`priority`] | Listener priority ordering |
//! | [`envelope`] | Request/response envelopes and event kinds |
//! | [`registry`] | Copy-on-write listener registry and snapshots |
//! | [`dispatcher`] | Fault-isolating event and status fan-out |
//! | [`diagnostics`] | Listener failure reports and sinks |
//! | [`hub`] | Owned registries + dispatchers for one proxy instance |
//! | [`config`] | Dispatcher configuration and logging setup |

pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod envelope;
pub mod hub;
pub mod listener;
pub mod priority;
pub mod registry;

/// Error type for the library
pub mod error;
pub use error::{ConfigContext, ConfigStage, Error};

pub use config::{DispatcherConfig, LoggingConfig};
pub use diagnostics::{
    Callback, CompositeDiagnosticsSink, DiagnosticsSink, FailureCause, InMemoryDiagnosticsSink,
    ListenerFailure, TracingDiagnosticsSink,
};
pub use dispatcher::{DispatchSummary, EventDispatcher, StatusDispatcher};
pub use envelope::{EventKind, ProxyEvent, ProxyRequest, ProxyResponse};
pub use hub::ListenerHub;
pub use listener::{ListenerResult, ListenerType, ProxyListener, ProxyStatus, ServerListener};
pub use priority::ListenerPriority;
pub use registry::{ListenerRegistration, ListenerRegistry, Snapshot};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
