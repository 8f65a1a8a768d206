//! Duplex session behaviour over an in-process transport.
//!
//! The test plays the node: it holds the peer end of a memory pair and
//! drives request, consume and response frames at the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use sparkl_duplex::{
    DuplexSession, Endpoint, Hooks, MemoryConnector, MemoryTransport, ProtocolErrorPolicy,
    SequentialIds, SessionConfig, SessionError, Transport,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Simulated Node
// ============================================================================

struct Peer {
    transport: MemoryTransport,
}

impl Peer {
    async fn send(&mut self, frame: Value) {
        self.transport
            .send(frame.to_string())
            .await
            .expect("peer send");
    }

    async fn recv(&mut self) -> Value {
        let text = timeout(WAIT, self.transport.recv())
            .await
            .expect("frame within timeout")
            .expect("session still connected")
            .expect("frame");
        serde_json::from_str(&text).expect("frame is JSON")
    }

    async fn expect_closed(&mut self) {
        let next = timeout(WAIT, self.transport.recv())
            .await
            .expect("close within timeout");
        assert!(next.is_none(), "expected close, got {next:?}");
    }
}

fn start(config: SessionConfig, hooks: Hooks) -> (DuplexSession, Peer) {
    let (local, peer) = MemoryTransport::pair();
    let session = DuplexSession::start(
        "memory://node",
        Box::new(local),
        config,
        hooks,
        Box::new(SequentialIds::new("S")),
    );
    (session, Peer { transport: peer })
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&count), count)
}

/// Installs the prime-checking implementation used by the node's test mix.
fn install_primes(session: &DuplexSession, consumed: Arc<Mutex<Vec<Value>>>) {
    let registry = session.registry();

    registry.on_request("Mix/FirstDivisor", |_request, reply| {
        reply
            .send(json!({"reply": "Ok", "data": {"div": 2}}))
            .expect("reply queued");
    });

    registry.on_request("Mix/Test", |request, reply| {
        let n = request["data"]["n"].as_u64().unwrap_or_default();
        let div = request["data"]["div"].as_u64().unwrap_or(1);
        let leaf = if n % div == 0 { "No" } else { "Iterate" };
        reply.send(json!({"reply": leaf})).expect("reply queued");
    });

    registry.on_request("Mix/Iterate", |request, reply| {
        let n = request["data"]["n"].as_u64().unwrap_or_default();
        let div = request["data"]["div"].as_u64().unwrap_or(2);
        let frame = if div * div > n {
            json!({"reply": "Stop"})
        } else {
            let next = if div == 2 { 3 } else { div + 2 };
            json!({"reply": "Next", "data": {"n": n, "div": next}})
        };
        reply.send(frame).expect("reply queued");
    });

    registry.on_consume("Mix/Consume", move |message| {
        consumed.lock().push(message);
    });
}

// ============================================================================
// Inbound Request / Consume
// ============================================================================

#[tokio::test]
async fn request_reply_carries_id_and_qualified_path() {
    let consumed = Arc::new(Mutex::new(Vec::new()));
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    install_primes(&session, consumed);

    peer.send(json!({"request": "Mix/FirstDivisor", "id": "ABC123"}))
        .await;

    assert_eq!(
        peer.recv().await,
        json!({"reply": "Mix/FirstDivisor/Ok", "id": "ABC123", "data": {"div": 2}})
    );
}

#[tokio::test]
async fn reply_path_already_qualified_is_unchanged() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    session.registry().on_request("Mix/Test", |_request, reply| {
        reply.send(json!({"reply": "Mix/Test/Stop"})).expect("queued");
    });

    peer.send(json!({"request": "Mix/Test", "id": "R1"})).await;

    let reply = peer.recv().await;
    assert_eq!(reply["reply"], json!("Mix/Test/Stop"));
    assert_eq!(reply["id"], json!("R1"));
}

#[tokio::test]
async fn prime_iteration_replies() {
    let consumed = Arc::new(Mutex::new(Vec::new()));
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    install_primes(&session, consumed);

    peer.send(json!({"request": "Mix/Test", "id": "T1", "data": {"n": 13, "div": 2}}))
        .await;
    assert_eq!(peer.recv().await["reply"], json!("Mix/Test/Iterate"));

    peer.send(json!({"request": "Mix/Iterate", "id": "T2", "data": {"n": 13, "div": 2}}))
        .await;
    let next = peer.recv().await;
    assert_eq!(next["reply"], json!("Mix/Iterate/Next"));
    assert_eq!(next["data"], json!({"n": 13, "div": 3}));

    peer.send(json!({"request": "Mix/Iterate", "id": "T3", "data": {"n": 13, "div": 5}}))
        .await;
    assert_eq!(peer.recv().await["reply"], json!("Mix/Iterate/Stop"));
}

#[tokio::test]
async fn consume_without_id_gets_no_reply() {
    let consumed = Arc::new(Mutex::new(Vec::new()));
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    install_primes(&session, Arc::clone(&consumed));

    peer.send(json!({"consume": "Mix/Consume", "data": {"n": 13}}))
        .await;
    // A following request proves the consume was processed first.
    peer.send(json!({"request": "Mix/FirstDivisor", "id": "AFTER"}))
        .await;

    assert_eq!(peer.recv().await["id"], json!("AFTER"));
    let consumed = consumed.lock();
    assert_eq!(consumed.len(), 1);
    assert_eq!(consumed[0]["data"]["n"], json!(13));
}

#[tokio::test]
async fn consume_with_id_is_answered() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    session.registry().on_request("Mix/Audit", |_message, reply| {
        reply.send(json!({"reply": "Done"})).expect("queued");
    });

    peer.send(json!({"consume": "Mix/Audit", "id": "C9"})).await;

    assert_eq!(
        peer.recv().await,
        json!({"reply": "Mix/Audit/Done", "id": "C9"})
    );
}

#[tokio::test]
async fn reply_may_come_later_from_another_thread() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    session.registry().on_request("Mix/Slow", |_request, reply| {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            reply.send(json!({"reply": "Ok"})).expect("queued");
        });
    });

    peer.send(json!({"request": "Mix/Slow", "id": "L1"})).await;

    assert_eq!(peer.recv().await, json!({"reply": "Mix/Slow/Ok", "id": "L1"}));
}

// ============================================================================
// Outbound Notify / Solicit
// ============================================================================

#[tokio::test]
async fn notify_creates_no_pending_entry() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());

    for n in 0..10 {
        session
            .notify(json!({"notify": "Mix/Notify", "data": {"n": n}}))
            .await
            .expect("notify");
    }
    assert_eq!(session.pending(), 0);

    for n in 0..10 {
        let frame = peer.recv().await;
        assert_eq!(frame["data"]["n"], json!(n));
        assert!(frame.get("id").is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_notify_from_plain_thread() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());

    let sender = session.clone();
    let thread = std::thread::spawn(move || sender.notify_blocking(json!({"notify": "Mix/FromThread"})));

    assert_eq!(peer.recv().await, json!({"notify": "Mix/FromThread"}));
    tokio::task::spawn_blocking(move || thread.join())
        .await
        .expect("join task")
        .expect("thread")
        .expect("notify written");
}

#[tokio::test]
async fn sync_solicit_returns_leaf_response() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());

    let caller = session.clone();
    let call = tokio::spawn(async move {
        caller
            .solicit(json!({"solicit": "Mix/CheckPrime", "data": {"n": 13}}))
            .await
    });

    let solicit = peer.recv().await;
    assert_eq!(solicit["solicit"], json!("Mix/CheckPrime"));
    assert_eq!(solicit["data"], json!({"n": 13}));
    let id = solicit["id"].clone();

    peer.send(json!({"response": "REST/Yes", "id": id})).await;

    let response = timeout(WAIT, call)
        .await
        .expect("in time")
        .expect("task")
        .expect("response");
    assert_eq!(response["response"], json!("Yes"));
    assert_eq!(session.pending(), 0);
}

#[tokio::test]
async fn async_solicit_invokes_callback_once_after_response() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    let (calls, seen) = counter();
    let (tx, rx) = tokio::sync::oneshot::channel();

    let id = session
        .solicit_with(json!({"solicit": "Mix/CheckPrime", "data": {"n": 13}}), move |response| {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(response);
        })
        .await
        .expect("solicit sent");

    let solicit = peer.recv().await;
    assert_eq!(solicit["id"], json!(id));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.pending(), 1);

    peer.send(json!({"response": "REST/Yes", "id": id})).await;

    let response = timeout(WAIT, rx).await.expect("in time").expect("callback ran");
    assert_eq!(response["response"], json!("Yes"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.pending(), 0);
}

#[tokio::test]
async fn concurrent_solicits_answered_out_of_order() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.solicit(json!({"solicit": "Mix/A"})).await })
    };
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.solicit(json!({"solicit": "Mix/B"})).await })
    };

    let mut ids = Vec::new();
    for _ in 0..2 {
        let frame = peer.recv().await;
        ids.push((frame["solicit"].clone(), frame["id"].clone()));
    }

    // Answer in reverse order of arrival, echoing each solicit's path.
    for (path, id) in ids.iter().rev() {
        let leaf = path.as_str().unwrap_or_default().trim_start_matches("Mix/");
        peer.send(json!({"response": format!("REST/{leaf}"), "id": id}))
            .await;
    }

    let first = first.await.expect("task").expect("response");
    let second = second.await.expect("task").expect("response");
    assert_eq!(first["response"], json!("A"));
    assert_eq!(second["response"], json!("B"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_solicits_from_threads_get_their_own_response() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());

    let threads: Vec<_> = ["Mix/A", "Mix/B"]
        .into_iter()
        .map(|path| {
            let session = session.clone();
            std::thread::spawn(move || {
                let response = session.solicit_blocking(json!({"solicit": path}));
                (path, response)
            })
        })
        .collect();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let frame = peer.recv().await;
        seen.push((frame["solicit"].clone(), frame["id"].clone()));
    }
    for (path, id) in seen.iter().rev() {
        peer.send(json!({"response": path, "id": id, "data": {"for": path}}))
            .await;
    }

    for thread in threads {
        let (path, response) = tokio::task::spawn_blocking(move || thread.join())
            .await
            .expect("join task")
            .expect("thread");
        let response = response.expect("response");
        assert_eq!(response["data"]["for"], json!(path));
        assert_eq!(response["response"], json!(path.rsplit('/').next().unwrap_or_default()));
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn close_releases_waiters_and_runs_hook_once() {
    let (closes, seen) = counter();
    let (session, mut peer) = start(
        SessionConfig::default(),
        Hooks::new().on_close(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let caller = session.clone();
    let call = tokio::spawn(async move { caller.solicit(json!({"solicit": "Mix/Never"})).await });
    let _ = peer.recv().await;

    session.close();
    session.close();
    session.closed().await;

    let result = timeout(WAIT, call).await.expect("in time").expect("task");
    assert!(matches!(result, Err(SessionError::Closed)));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    peer.expect_closed().await;
}

#[tokio::test]
async fn peer_close_runs_hook_once() {
    let (closes, seen) = counter();
    let (session, mut peer) = start(
        SessionConfig::default(),
        Hooks::new().on_close(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    peer.transport.close().await.expect("peer close");
    timeout(WAIT, session.closed()).await.expect("loop ended");
    session.close();

    assert!(!session.is_open());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn open_hook_registers_before_first_frame() {
    let (local, peer_end) = MemoryTransport::pair();
    let mut peer = Peer { transport: peer_end };

    // The request is already queued when the session connects.
    peer.send(json!({"request": "Mix/FirstDivisor", "id": "EARLY"}))
        .await;

    let connector = MemoryConnector::new(local);
    let endpoint = Endpoint::new("https://node.example.com", "TestRest/REST")
        .with_folder("/Scratch")
        .with_cookie("ipaas_session=abc");
    let (opens, seen) = counter();

    let session = DuplexSession::open(
        &connector,
        &endpoint,
        SessionConfig::default(),
        Hooks::new().on_open(move |session| {
            seen.fetch_add(1, Ordering::SeqCst);
            session.registry().on_request("Mix/FirstDivisor", |_r, reply| {
                reply.send(json!({"reply": "Ok"})).expect("queued");
            });
        }),
    )
    .await
    .expect("open");

    assert_eq!(peer.recv().await["id"], json!("EARLY"));
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(
        connector.requested(),
        Some((
            "wss://node.example.com/svc_rest/websocket//Scratch/TestRest/REST".to_owned(),
            Some("ipaas_session=abc".to_owned()),
        ))
    );
    assert_eq!(session.url(), "wss://node.example.com/svc_rest/websocket//Scratch/TestRest/REST");
}

#[tokio::test]
async fn open_fails_with_connection_error() {
    let connector = MemoryConnector::refusing();
    let endpoint = Endpoint::new("http://localhost:1", "REST");
    let result = DuplexSession::open(&connector, &endpoint, SessionConfig::default(), Hooks::new()).await;
    assert!(matches!(result, Err(SessionError::Connection(_))));
}

#[tokio::test]
async fn open_uses_configured_prefix() {
    let (local, _peer) = MemoryTransport::pair();
    let connector = MemoryConnector::new(local);
    let config = SessionConfig {
        prefix: "svc_other/ws/".to_owned(),
        ..SessionConfig::default()
    };
    let endpoint = Endpoint::new("http://localhost:8000", "me@x.com/A/REST");

    let session = DuplexSession::open(&connector, &endpoint, config, Hooks::new())
        .await
        .expect("open");
    assert_eq!(session.url(), "ws://localhost:8000/svc_other/ws/me@x.com/A/REST");
}

// ============================================================================
// Protocol Errors
// ============================================================================

#[tokio::test]
async fn unknown_handler_terminates_session() {
    let (closes, seen) = counter();
    let (session, mut peer) = start(
        SessionConfig::default(),
        Hooks::new().on_close(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    peer.send(json!({"request": "Mix/Missing", "id": "X"})).await;

    timeout(WAIT, session.closed()).await.expect("loop ended");
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    peer.expect_closed().await;
}

#[tokio::test]
async fn unknown_response_id_terminates_session() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());

    peer.send(json!({"response": "REST/Ok", "id": "NOBODY"})).await;

    timeout(WAIT, session.closed()).await.expect("loop ended");
    assert!(!session.is_open());
}

#[tokio::test]
async fn handler_shape_mismatch_terminates_session() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    session.registry().on_consume("Mix/Consume", |_| {});

    peer.send(json!({"request": "Mix/Consume", "id": "R"})).await;

    timeout(WAIT, session.closed()).await.expect("loop ended");
}

#[tokio::test]
async fn skip_policy_keeps_session_alive() {
    let config = SessionConfig {
        protocol_errors: ProtocolErrorPolicy::Skip,
        ..SessionConfig::default()
    };
    let (session, mut peer) = start(config, Hooks::new());
    session.registry().on_request("Mix/Ok", |_r, reply| {
        reply.send(json!({"reply": "Ok"})).expect("queued");
    });

    peer.transport
        .send("this is not json".to_owned())
        .await
        .expect("peer send");
    peer.send(json!({"request": "Mix/Missing", "id": "M"})).await;
    peer.send(json!({"notify": "Mix/WrongWay"})).await;
    peer.send(json!({"request": "Mix/Ok", "id": "STILL"})).await;

    assert_eq!(peer.recv().await, json!({"reply": "Mix/Ok/Ok", "id": "STILL"}));
    assert!(session.is_open());
}

#[tokio::test]
async fn blank_frames_are_ignored() {
    let (session, mut peer) = start(SessionConfig::default(), Hooks::new());
    session.registry().on_request("Mix/Ok", |_r, reply| {
        reply.send(json!({"reply": "Ok"})).expect("queued");
    });

    peer.transport.send(String::new()).await.expect("peer send");
    peer.send(json!({"request": "Mix/Ok", "id": "B"})).await;

    assert_eq!(peer.recv().await["id"], json!("B"));
    assert!(session.is_open());
}
