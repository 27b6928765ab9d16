//! Ordering and fault-isolation properties of the dispatcher.

use proxy_dispatch::{
    Callback, EventDispatcher, EventKind, InMemoryDiagnosticsSink, ListenerPriority,
    ListenerRegistry, ListenerResult, ProxyListener, ProxyRequest, ProxyResponse,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::sync::{Arc, Mutex};

type Calls = Arc<Mutex<Vec<usize>>>;

struct Tracker {
    id: usize,
    calls: Calls,
    fail_on: Option<EventKind>,
}

impl Tracker {
    fn hit(&self, kind: EventKind) -> ListenerResult {
        self.calls.lock().unwrap().push(self.id);
        if self.fail_on == Some(kind) {
            anyhow::bail!("tracker {} failed on {}", self.id, kind);
        }
        Ok(())
    }
}

impl ProxyListener for Tracker {
    fn on_client_to_proxy_request(&self, _request: &mut ProxyRequest) -> ListenerResult {
        self.hit(EventKind::ClientToProxyRequest)
    }

    fn on_proxy_to_server_request(&self, _request: &mut ProxyRequest) -> ListenerResult {
        self.hit(EventKind::ProxyToServerRequest)
    }

    fn on_server_to_proxy_response(&self, _response: &mut ProxyResponse) -> ListenerResult {
        self.hit(EventKind::ServerToProxyResponse)
    }

    fn on_proxy_to_client_response(&self, _response: &mut ProxyResponse) -> ListenerResult {
        self.hit(EventKind::ProxyToClientResponse)
    }
}

fn fire(dispatcher: &EventDispatcher, kind: EventKind) -> proxy_dispatch::DispatchSummary {
    let mut request = ProxyRequest::get(http::Uri::from_static("http://example.com/"));
    let mut response = ProxyResponse::new(http::StatusCode::OK);
    match kind {
        EventKind::ClientToProxyRequest => dispatcher.client_to_proxy_request(&mut request),
        EventKind::ProxyToServerRequest => dispatcher.proxy_to_server_request(&mut request),
        EventKind::ServerToProxyResponse => dispatcher.server_to_proxy_response(&mut response),
        EventKind::ProxyToClientResponse => dispatcher.proxy_to_client_response(&mut response),
    }
}

#[test]
fn snapshot_sorted_by_priority_then_registration_order() {
    let mut rng = StdRng::seed_from_u64(7);
    for round in 0..50 {
        let registry = ListenerRegistry::<dyn ProxyListener>::new();
        let calls: Calls = Arc::default();
        let count = rng.random_range(1..=12usize);
        let mut declared = Vec::new();
        for id in 0..count {
            let priority = ListenerPriority::ALL[rng.random_range(0..ListenerPriority::ALL.len())];
            declared.push((id, priority));
            registry.register(
                Arc::new(Tracker {
                    id,
                    calls: calls.clone(),
                    fail_on: None,
                }),
                format!("plugin-{id}"),
                priority,
            );
        }

        let mut expected = declared.clone();
        // Stable sort keeps registration order for equal priorities.
        expected.sort_by(|a, b| b.1.cmp(&a.1));

        let snapshot = registry.snapshot();
        let actual: Vec<(usize, ListenerPriority)> = snapshot
            .iter()
            .map(|r| {
                let id = r
                    .owner_plugin_id()
                    .trim_start_matches("plugin-")
                    .parse::<usize>()
                    .unwrap();
                (id, r.priority())
            })
            .collect();
        assert_eq!(actual, expected, "round {round}");

        let dispatcher = EventDispatcher::new(Arc::new(registry));
        fire(&dispatcher, EventKind::ClientToProxyRequest);
        let order: Vec<usize> = expected.iter().map(|(id, _)| *id).collect();
        assert_eq!(*calls.lock().unwrap(), order, "round {round}");
    }
}

#[test]
fn every_listener_runs_once_whichever_one_fails() {
    const N: usize = 6;
    for kind in EventKind::ALL {
        for failing in 0..N {
            let registry = Arc::new(ListenerRegistry::<dyn ProxyListener>::new());
            let sink = Arc::new(InMemoryDiagnosticsSink::default());
            let dispatcher = EventDispatcher::new(registry.clone()).with_sink(sink.clone());
            let calls: Calls = Arc::default();
            for id in 0..N {
                registry.register(
                    Arc::new(Tracker {
                        id,
                        calls: calls.clone(),
                        fail_on: (id == failing).then_some(kind),
                    }),
                    format!("plugin-{id}"),
                    ListenerPriority::Normal,
                );
            }

            let summary = fire(&dispatcher, kind);

            assert_eq!(*calls.lock().unwrap(), (0..N).collect::<Vec<_>>());
            assert_eq!(summary.invoked, N);
            assert_eq!(summary.failed, 1);
            let failures = sink.failures();
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].owner_plugin_id, format!("plugin-{failing}"));
            assert_eq!(failures[0].callback, Callback::Proxy(kind));
            assert!(failures[0].listener_type.ends_with("Tracker"));
        }
    }
}

#[test]
fn failure_on_one_event_kind_does_not_leak_into_others() {
    let registry = Arc::new(ListenerRegistry::<dyn ProxyListener>::new());
    let sink = Arc::new(InMemoryDiagnosticsSink::default());
    let dispatcher = EventDispatcher::new(registry.clone()).with_sink(sink.clone());
    let calls: Calls = Arc::default();
    registry.register(
        Arc::new(Tracker {
            id: 0,
            calls: calls.clone(),
            fail_on: Some(EventKind::ServerToProxyResponse),
        }),
        "picky",
        ListenerPriority::Normal,
    );

    for kind in EventKind::ALL {
        fire(&dispatcher, kind);
    }
    assert_eq!(calls.lock().unwrap().len(), 4);
    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].callback,
        Callback::Proxy(EventKind::ServerToProxyResponse)
    );
}

#[test]
fn concrete_scenario_a_c_b() {
    let registry = Arc::new(ListenerRegistry::<dyn ProxyListener>::new());
    let sink = Arc::new(InMemoryDiagnosticsSink::default());
    let dispatcher = EventDispatcher::new(registry.clone()).with_sink(sink.clone());
    let calls: Calls = Arc::default();
    let tracker = |id, fail_on| {
        Arc::new(Tracker {
            id,
            calls: calls.clone(),
            fail_on,
        })
    };

    // A = 0, B = 1, C = 2
    registry.register(tracker(0, None), "plugin-a", ListenerPriority::High);
    registry.register(
        tracker(1, Some(EventKind::ProxyToClientResponse)),
        "plugin-b",
        ListenerPriority::Normal,
    );
    registry.register(tracker(2, None), "plugin-c", ListenerPriority::High);

    let owners: Vec<String> = registry
        .snapshot()
        .iter()
        .map(|r| r.owner_plugin_id().to_string())
        .collect();
    assert_eq!(owners, vec!["plugin-a", "plugin-c", "plugin-b"]);

    let summary = fire(&dispatcher, EventKind::ProxyToClientResponse);
    assert_eq!(*calls.lock().unwrap(), vec![0, 2, 1]);
    assert_eq!(summary.failed, 1);

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].owner_plugin_id, "plugin-b");
    assert_eq!(failures[0].priority, ListenerPriority::Normal);
    assert_eq!(
        failures[0].cause.message(),
        "tracker 1 failed on proxy_to_client_response"
    );
}
