use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use slotwire_frame::{FrameError, MIN_FRAME_OVERHEAD};
use slotwire_peer::{
    HandshakeConfig, LinkTable, MultiplexerBuilder, Peer, PeerConfig, PeerError, RequestContext,
    SequentialIds,
};
use slotwire_transport::{MemorySlot, SlotWriter, TransportError, DEFAULT_MAX_SLOT_BYTES};
use tokio::time::{sleep, Instant};

struct Pair {
    client: Peer,
    server: Peer,
    to_server: MemorySlot,
    to_client: MemorySlot,
}

async fn pair(client: MultiplexerBuilder, server: MultiplexerBuilder) -> Pair {
    let to_server = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let to_client = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let server = server
        .connect(to_client.link_with(&to_server))
        .await
        .unwrap();
    let client = client
        .connect(to_server.link_with(&to_client))
        .await
        .unwrap();
    Pair {
        client,
        server,
        to_server,
        to_client,
    }
}

fn client(config: PeerConfig) -> MultiplexerBuilder {
    MultiplexerBuilder::new(config).id_generator(SequentialIds::new("a"))
}

fn server(config: PeerConfig) -> MultiplexerBuilder {
    MultiplexerBuilder::new(config).id_generator(SequentialIds::new("b"))
}

fn echo(builder: MultiplexerBuilder) -> MultiplexerBuilder {
    builder.on_message(|msg: Value, _ctx: RequestContext| async move { Some(msg) })
}

#[tokio::test(start_paused = true)]
async fn ping_is_chunked_and_acknowledged() {
    let config = PeerConfig::default().with_max_slot_bytes(MIN_FRAME_OVERHEAD + 7);
    let server = server(config.clone()).on_message(|msg: Value, _ctx: RequestContext| async move {
        (msg == json!({"op": "ping"})).then(|| json!({"op": "pong"}))
    });
    let p = pair(client(config), server).await;

    let response = p.client.send(json!({"op": "ping"})).await.unwrap();
    assert_eq!(response, json!({"op": "pong"}));

    assert_eq!(
        p.to_server.history(),
        vec![
            "MSG:REQ:a-1:0/3:eyJvcCI",
            "MSG:REQ:a-1:1/3:6InBpbm",
            "MSG:REQ:a-1:2/3:cifQ",
            "ACK:a-1:0",
            "ACK:a-1:1",
            "ACK:a-1:2",
        ]
    );
    assert_eq!(
        p.to_client.history(),
        vec![
            "ACK:a-1:0",
            "ACK:a-1:1",
            "ACK:a-1:2",
            "MSG:RES:a-1:0/3:eyJvcCI",
            "MSG:RES:a-1:1/3:6InBvbm",
            "MSG:RES:a-1:2/3:cifQ",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn requests_complete_in_fifo_order_one_at_a_time() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, pk) = (Arc::clone(&active), Arc::clone(&peak));
    let server = server(PeerConfig::default()).on_message(move |msg: Value, _ctx: RequestContext| {
        let (active, peak) = (Arc::clone(&a), Arc::clone(&pk));
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            // Earlier requests take longer, so any overlap would reorder them.
            let n = msg.as_u64().unwrap_or(0);
            sleep(Duration::from_millis(300 - n * 100)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Some(msg)
        }
    });
    let p = pair(client(PeerConfig::default()), server).await;

    let done = Arc::new(Mutex::new(Vec::new()));
    let send = |n: u64| {
        let (client, done) = (p.client.clone(), Arc::clone(&done));
        async move {
            let response = client.send(json!(n)).await.unwrap();
            done.lock().unwrap().push(response);
        }
    };
    tokio::join!(send(0), send(1), send(2));

    assert_eq!(*done.lock().unwrap(), vec![json!(0), json!(1), json!(2)]);
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    let request_ids: Vec<String> = p
        .to_server
        .history()
        .iter()
        .filter_map(|frame| frame.strip_prefix("MSG:REQ:"))
        .map(|rest| rest.split(':').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(request_ids, vec!["a-1", "a-2", "a-3"]);
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_and_queue_proceeds() {
    let config = PeerConfig::default().with_request_timeout(Duration::from_secs(1));
    let server = server(PeerConfig::default()).on_message(|msg: Value, _ctx: RequestContext| async move {
        (msg != json!("ignored")).then_some(msg)
    });
    let p = pair(client(config), server).await;

    let start = Instant::now();
    let (first, second) = tokio::join!(
        p.client.send(json!("ignored")),
        p.client.send(json!("answered"))
    );

    assert!(matches!(first, Err(PeerError::Timeout(d)) if d == Duration::from_secs(1)));
    assert_eq!(second.unwrap(), json!("answered"));
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn destinations_do_not_block_each_other() {
    let to_b = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let from_b = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let to_c = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let from_c = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);

    let _b = server(PeerConfig::default())
        .on_message(|_msg: Value, _ctx: RequestContext| async {
            sleep(Duration::from_secs(10)).await;
            Some(json!("b"))
        })
        .connect(from_b.link_with(&to_b))
        .await
        .unwrap();
    let _c = echo(server(PeerConfig::default()))
        .connect(from_c.link_with(&to_c))
        .await
        .unwrap();

    let links = LinkTable::new()
        .with("b", to_b.link_with(&from_b))
        .with("c", to_c.link_with(&from_c));
    let hub = client(PeerConfig::default()).spawn(links).unwrap();

    let done = Arc::new(Mutex::new(Vec::new()));
    let send = |destination: &'static str| {
        let (hub, done) = (hub.clone(), Arc::clone(&done));
        async move {
            hub.send(destination, json!(destination)).await.unwrap();
            done.lock().unwrap().push(destination);
        }
    };
    tokio::join!(send("b"), send("c"));

    assert_eq!(*done.lock().unwrap(), vec!["c", "b"]);
}

#[tokio::test(start_paused = true)]
async fn handshake_tags_frames_and_filters_cross_talk() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let server = server(PeerConfig::default().with_handshake(HandshakeConfig::responder()))
        .on_message(move |msg: Value, _ctx: RequestContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Some(msg) }
        });
    let client = client(PeerConfig::default().with_handshake(HandshakeConfig::initiator()));
    let p = pair(client, server).await;

    assert_eq!(p.client.send(json!("one")).await.unwrap(), json!("one"));

    let init = p.to_server.history()[0].clone();
    let secret = init.strip_prefix("INIT:").unwrap().to_string();
    assert_eq!(p.to_client.history()[0], format!("ACK-INIT:{secret}"));

    // An unrelated writer on the same slot gets no reaction at all.
    let before = p.to_client.history().len();
    p.to_server.write("MSG:REQ:evil:0/1:e30").unwrap();
    sleep(Duration::from_millis(10)).await;
    p.to_server.write("MSG:wrong:REQ:evil:0/1:e30").unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(p.to_client.history().len(), before);

    assert_eq!(p.client.send(json!("two")).await.unwrap(), json!("two"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let ours = p.to_server.history().into_iter().filter(|frame| !frame.contains("evil"));
    for frame in ours.chain(p.to_client.history()) {
        if frame.starts_with("MSG:") || frame.starts_with("ACK:") {
            let tagged = frame.starts_with(&format!("MSG:{secret}:"))
                || frame.starts_with(&format!("ACK:{secret}:"));
            assert!(tagged, "untagged frame {frame}");
        }
    }
    assert!(!p.server.handle().is_closed());
}

#[tokio::test(start_paused = true)]
async fn handshake_without_responder_fails() {
    let to_nobody = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let silent = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let peer = client(PeerConfig::default().with_handshake(HandshakeConfig::initiator()))
        .connect(to_nobody.link_with(&silent))
        .await
        .unwrap();

    let start = Instant::now();
    let err = peer.send(json!("hello")).await.unwrap_err();

    assert!(matches!(err, PeerError::HandshakeFailed(_)));
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(to_nobody.history()[0].starts_with("INIT:"));
}

#[tokio::test(start_paused = true)]
async fn responder_attaching_after_handshake_timeout_recovers() {
    let to_server = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let to_client = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let peer = client(PeerConfig::default().with_handshake(HandshakeConfig::initiator()))
        .connect(to_server.link_with(&to_client))
        .await
        .unwrap();

    let err = peer.send(json!("early")).await.unwrap_err();
    assert!(matches!(err, PeerError::HandshakeFailed(_)));

    // The responder reads the INIT still sitting in the slot.
    let _server = echo(server(
        PeerConfig::default().with_handshake(HandshakeConfig::responder()),
    ))
    .connect(to_client.link_with(&to_server))
    .await
    .unwrap();
    sleep(Duration::from_millis(10)).await;

    let secret = to_server.history()[0]
        .strip_prefix("INIT:")
        .unwrap()
        .to_string();
    assert_eq!(to_client.history()[0], format!("ACK-INIT:{secret}"));

    for round in 0..3 {
        assert_eq!(peer.send(json!(round)).await.unwrap(), json!(round));
    }
    let inits: Vec<String> = to_server
        .history()
        .into_iter()
        .filter(|frame| frame.starts_with("INIT:"))
        .collect();
    assert!(inits.iter().all(|init| *init == format!("INIT:{secret}")));
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_pending_requests() {
    let server = server(PeerConfig::default())
        .on_message(|_msg: Value, _ctx: RequestContext| async { None::<Value> });
    let p = pair(client(PeerConfig::default()), server).await;
    let handle = p.client.handle().clone();

    let (sent, torn_down) = tokio::join!(p.client.send(json!("pending")), async {
        sleep(Duration::from_secs(1)).await;
        handle.teardown(p.client.destination().clone()).await
    });

    assert!(matches!(sent, Err(PeerError::Cancelled(_))));
    assert!(torn_down.unwrap());

    // The link was consumed, so the destination cannot be re-created.
    let err = p.client.send(json!("again")).await.unwrap_err();
    assert!(matches!(
        err,
        PeerError::Transport(TransportError::UnknownDestination(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn malformed_request_reaches_failure_hook() {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&failures);
    let to_server = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let to_client = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let _server = echo(server(PeerConfig::default()))
        .on_failure(move |destination, err| {
            let malformed = matches!(err, PeerError::Frame(FrameError::MalformedPayload(_)));
            seen.lock().unwrap().push((destination.to_string(), malformed));
        })
        .connect(to_client.link_with(&to_server))
        .await
        .unwrap();

    to_server.write("MSG:REQ:bad:0/1:e25vdC1qc29u").unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(*failures.lock().unwrap(), vec![("peer".to_string(), true)]);
    assert_eq!(to_client.history(), vec!["ACK:bad:0"]);
}

#[tokio::test(start_paused = true)]
async fn value_present_at_attach_is_processed() {
    let to_server = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    let to_client = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
    to_server.write("MSG:REQ:early:0/1:ImhpIg").unwrap();

    let _server = echo(server(PeerConfig::default()))
        .connect(to_client.link_with(&to_server))
        .await
        .unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        to_client.history(),
        vec!["ACK:early:0", "MSG:RES:early:0/1:ImhpIg"]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_session() {
    let p = pair(
        client(PeerConfig::default()),
        echo(server(PeerConfig::default())),
    )
    .await;
    assert_eq!(p.client.send(json!(1)).await.unwrap(), json!(1));

    p.client.handle().shutdown().await.unwrap();

    let err = p.client.send(json!(2)).await.unwrap_err();
    assert!(matches!(err, PeerError::Disconnected(_)));
}

#[tokio::test(start_paused = true)]
async fn typed_requests_round_trip() {
    #[derive(serde::Serialize)]
    struct Ping {
        op: &'static str,
    }
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Pong {
        op: String,
    }

    let server = server(PeerConfig::default()).on_message(|_msg: Value, _ctx: RequestContext| async {
        Some(json!({"op": "pong"}))
    });
    let p = pair(client(PeerConfig::default()), server).await;

    let pong: Pong = p.client.request(&Ping { op: "ping" }).await.unwrap();
    assert_eq!(pong, Pong { op: "pong".into() });
}
