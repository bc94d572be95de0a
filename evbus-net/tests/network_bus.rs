use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use evbus_config::EvbusConfig;
use evbus_core::DispatchError;
use evbus_net::protocol::{EventPush, SubscribeRequest};
use evbus_net::{
    args, values, Bus, BusError, BusState, Endpoint, EventBus, Out, RemoteErrorKind, RpcListener,
    TransportError, Value,
};

const ANY_PORT: &str = "127.0.0.1:0";

fn unused_address() -> String {
    let socket = std::net::TcpListener::bind(ANY_PORT).unwrap();
    socket.local_addr().unwrap().to_string()
}

async fn started(bus: Bus) -> Bus {
    bus.start().await.unwrap();
    bus
}

#[tokio::test(flavor = "multi_thread")]
async fn server_publish_reaches_client_exactly_once() {
    let server = started(Bus::server(ANY_PORT, "/_server_bus_", EventBus::new())).await;
    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let sink = calls.clone();
    client
        .subscribe_remote(
            "topic",
            move |a: i64| -> Result<(), String> {
                sink.fetch_add(1, Ordering::SeqCst);
                if a == 10 {
                    Ok(())
                } else {
                    Err(format!("expected 10, got {a}"))
                }
            },
            &server.local_endpoint(),
        )
        .await
        .unwrap();
    assert!(server.event_bus().has_callback("topic"));

    let report = server.event_bus().publish("topic", args![10]).await;
    assert!(report.is_ok(), "{report:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_fan_out_carries_ints_and_strings() {
    let server = started(Bus::server(ANY_PORT, "/_server_bus_", EventBus::new())).await;
    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;
    let remote = server.local_endpoint();

    let sum = Arc::new(AtomicI64::new(0));
    let sink = sum.clone();
    client
        .subscribe_remote(
            "main:calculator",
            move |a: i64, b: i64| sink.store(a + b, Ordering::SeqCst),
            &remote,
        )
        .await
        .unwrap();

    let greeting = Arc::new(Mutex::new(String::new()));
    let sink = greeting.clone();
    client
        .subscribe_remote(
            "main:greet",
            move |name: String| *sink.lock().unwrap() = format!("hello {name}"),
            &remote,
        )
        .await
        .unwrap();

    server.event_bus().publish("main:calculator", args![20, 10]).await;
    server.event_bus().publish("main:greet", args!["evbus"]).await;

    assert_eq!(sum.load(Ordering::SeqCst), 30);
    assert_eq!(*greeting.lock().unwrap(), "hello evbus");

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn network_buses_deliver_both_directions_independently() {
    let n1 = started(Bus::network(ANY_PORT, "/_net_bus_")).await;
    let n2 = started(Bus::network(ANY_PORT, "/_net_bus_")).await;

    let e1 = Arc::new(AtomicUsize::new(0));
    let e2 = Arc::new(AtomicUsize::new(0));
    let sink = e1.clone();
    n1.subscribe_remote(
        "e1",
        move |_: i64| {
            sink.fetch_add(1, Ordering::SeqCst);
        },
        &n2.local_endpoint(),
    )
    .await
    .unwrap();
    let sink = e2.clone();
    n2.subscribe_remote(
        "e2",
        move |_: i64| {
            sink.fetch_add(1, Ordering::SeqCst);
        },
        &n1.local_endpoint(),
    )
    .await
    .unwrap();

    n2.event_bus().publish("e1", args![1]).await;
    assert_eq!(e1.load(Ordering::SeqCst), 1);
    assert_eq!(e2.load(Ordering::SeqCst), 0);

    n1.event_bus().publish("e2", args![2]).await;
    assert_eq!(e1.load(Ordering::SeqCst), 1);
    assert_eq!(e2.load(Ordering::SeqCst), 1);

    n1.stop().await;
    n2.stop().await;
}

#[tokio::test]
async fn local_query_works_on_an_unstarted_bus() {
    let bus = Bus::network(&unused_address(), "/_net_bus_");
    bus.subscribe("query", |result: Out<i64>| result.set(10)).unwrap();

    let reply = evbus_net::Reply::<i64>::new();
    let report = bus.publish("query", args![reply.out()]).await;
    assert!(report.is_ok());
    assert_eq!(reply.get(), Some(10));
    assert_eq!(bus.state().await, BusState::Created);
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribing_to_a_client_without_listener_fails_at_dial() {
    let network = started(Bus::network(ANY_PORT, "/_net_bus_")).await;
    let client = Bus::client(&unused_address(), "/_client_bus_", EventBus::new());

    let result = network
        .subscribe_remote("topic", |_: i64| {}, &client.local_endpoint())
        .await;
    assert!(matches!(
        result,
        Err(BusError::Transport(TransportError::Connect { .. }))
    ));
    assert!(!network.event_bus().has_callback("topic"));

    network.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn started_client_refuses_subscriptions() {
    let network = started(Bus::network(ANY_PORT, "/_net_bus_")).await;
    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;

    let result = network
        .subscribe_remote("topic", |_: i64| {}, &client.local_endpoint())
        .await;
    match result {
        Err(BusError::Remote { error, .. }) => assert_eq!(error.kind, RemoteErrorKind::Unsupported),
        other => panic!("expected remote rejection, got {other:?}"),
    }
    assert!(!client.event_bus().has_callback("topic"));
    assert!(!network.event_bus().has_callback("topic"));

    client.stop().await;
    network.stop().await;
}

#[tokio::test]
async fn register_on_unstarted_server_touches_only_the_exact_topic() {
    let server = Bus::server(":2010", "/_server_bus_", EventBus::new());
    let request = SubscribeRequest::subscribe(&Endpoint::new(":2015", "/_client_bus_"), "topic");

    assert_eq!(server.service().register(&request), Ok(true));
    assert!(server.event_bus().has_callback("topic"));
    assert!(!server.event_bus().has_callback("topic_topic"));
}

#[tokio::test]
async fn push_event_on_unstarted_client_dispatches_locally() {
    let client = Bus::client(":2015", "/_client_bus_", EventBus::new());
    let seen = Arc::new(AtomicI64::new(0));
    let sink = seen.clone();
    client
        .subscribe("topic", move |a: i64| sink.store(a, Ordering::SeqCst))
        .unwrap();

    let push = EventPush {
        args: vec![Value::Int(10)],
        topic: "topic".into(),
        trail: Vec::new(),
    };
    assert_eq!(client.service().push_event(push).await, Ok(true));
    assert_eq!(seen.load(Ordering::SeqCst), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn mutual_subscriptions_do_not_loop() {
    let n1 = started(Bus::network(ANY_PORT, "/_net_bus_")).await;
    let n2 = started(Bus::network(ANY_PORT, "/_net_bus_")).await;

    let on_n1 = Arc::new(AtomicUsize::new(0));
    let on_n2 = Arc::new(AtomicUsize::new(0));
    let sink = on_n1.clone();
    n1.subscribe_remote(
        "t",
        move |_: i64| {
            sink.fetch_add(1, Ordering::SeqCst);
        },
        &n2.local_endpoint(),
    )
    .await
    .unwrap();
    let sink = on_n2.clone();
    n2.subscribe_remote(
        "t",
        move |_: i64| {
            sink.fetch_add(1, Ordering::SeqCst);
        },
        &n1.local_endpoint(),
    )
    .await
    .unwrap();

    let report = n1.event_bus().publish("t", args![1]).await;
    assert!(report.is_ok(), "{report:?}");
    assert_eq!(on_n1.load(Ordering::SeqCst), 1);
    assert_eq!(on_n2.load(Ordering::SeqCst), 1);

    n2.event_bus().publish("t", args![2]).await;
    assert_eq!(on_n1.load(Ordering::SeqCst), 2);
    assert_eq!(on_n2.load(Ordering::SeqCst), 2);

    n1.stop().await;
    n2.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_remote_stops_forwarding_after_last_handler() {
    let server = started(Bus::server(ANY_PORT, "/_server_bus_", EventBus::new())).await;
    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;
    let remote = server.local_endpoint();

    let calls = Arc::new(AtomicUsize::new(0));
    let sink = calls.clone();
    let first = client
        .subscribe_remote(
            "topic",
            move |_: i64| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
            &remote,
        )
        .await
        .unwrap();
    let sink = calls.clone();
    let second = client
        .subscribe_remote(
            "topic",
            move |_: i64| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
            &remote,
        )
        .await
        .unwrap();
    assert_eq!(server.event_bus().handler_count("topic"), 1);

    server.event_bus().publish("topic", args![1]).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(client.unsubscribe_remote("topic", first, &remote).await.unwrap());
    assert!(server.event_bus().has_callback("topic"));
    server.event_bus().publish("topic", args![1]).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert!(client.unsubscribe_remote("topic", second, &remote).await.unwrap());
    assert!(!server.event_bus().has_callback("topic"));
    assert!(!client.unsubscribe_remote("topic", second, &remote).await.unwrap());

    server.event_bus().publish("topic", args![1]).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn query_remote_returns_the_written_value() {
    let server = started(Bus::server(ANY_PORT, "/_server_bus_", EventBus::new())).await;
    let client = Bus::client(ANY_PORT, "/_client_bus_", EventBus::new());
    server
        .subscribe("main:double", |n: i64, out: Out<i64>| out.set(n * 2))
        .unwrap();

    let remote = server.local_endpoint();
    let answer: Option<i64> = client
        .query_remote("main:double", values([21i64]), &remote)
        .await
        .unwrap();
    assert_eq!(answer, Some(42));

    let nothing: Option<i64> = client
        .query_remote("main:unknown", Vec::new(), &remote)
        .await
        .unwrap();
    assert_eq!(nothing, None);

    let wrong_type = client
        .query_remote::<String>("main:double", values([1i64]), &remote)
        .await;
    assert!(matches!(wrong_type, Err(BusError::Decode(_))));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarded_event_reaching_output_handler_is_reported() {
    let publisher = started(Bus::network(ANY_PORT, "/_net_bus_")).await;
    let subscriber = started(Bus::network(ANY_PORT, "/_net_bus_")).await;

    subscriber
        .subscribe("q", |_: i64, out: Out<i64>| out.set(1))
        .unwrap();
    subscriber
        .subscribe_remote("q", |_: i64| {}, &publisher.local_endpoint())
        .await
        .unwrap();

    let report = publisher.event_bus().publish("q", args![5]).await;
    assert_eq!(report.into_result(), Err(DispatchError::UnsupportedPattern));

    publisher.stop().await;
    subscriber.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn buses_share_one_listener_by_path() {
    let listener = RpcListener::bind(ANY_PORT, 64 * 1024).await.unwrap();
    let a = started(Bus::network(ANY_PORT, "/a").with_listener(listener.clone())).await;
    let b = started(Bus::network(ANY_PORT, "/b").with_listener(listener.clone())).await;
    assert_eq!(a.local_endpoint().address, b.local_endpoint().address);
    assert_eq!(listener.paths(), vec!["/a".to_owned(), "/b".to_owned()]);

    let seen = Arc::new(AtomicI64::new(0));
    let sink = seen.clone();
    a.subscribe_remote("x", move |v: i64| sink.store(v, Ordering::SeqCst), &b.local_endpoint())
        .await
        .unwrap();
    b.event_bus().publish("x", args![7]).await;
    assert_eq!(seen.load(Ordering::SeqCst), 7);

    b.stop().await;
    assert!(listener.is_running());
    assert_eq!(listener.paths(), vec!["/a".to_owned()]);

    let duplicate = Bus::network(ANY_PORT, "/a").with_listener(listener.clone());
    assert!(matches!(duplicate.start().await, Err(BusError::PathInUse(_))));

    a.stop().await;
    listener.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_bus_is_no_longer_reachable() {
    let server = started(Bus::server(ANY_PORT, "/_server_bus_", EventBus::new())).await;
    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;
    let remote = server.local_endpoint();

    server.stop().await;
    assert_eq!(server.state().await, BusState::Stopped);
    let result = client.subscribe_remote("topic", |_: i64| {}, &remote).await;
    assert!(matches!(
        result,
        Err(BusError::Transport(TransportError::Connect { .. }))
    ));
    assert!(!client.event_bus().has_callback("topic"));

    client.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_bus_counts_forwarded_events() {
    let mut config = EvbusConfig::default();
    config.node.role = "server".into();
    config.node.address = ANY_PORT.into();
    config.telemetry.metrics_enabled = true;
    let server = Bus::from_config(&config).unwrap();
    server.start().await.unwrap();

    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;
    client
        .subscribe_remote("topic", |_: i64| {}, &server.local_endpoint())
        .await
        .unwrap();
    server.event_bus().publish("topic", args![1]).await;

    let metrics = server.event_bus().metrics().unwrap();
    assert_eq!(metrics.forwarded_events.get(), 1);
    assert_eq!(metrics.rpc_latency.get_sample_count(), 1);

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishes_all_cross_the_wire() {
    const PUBLISHES: i64 = 50;
    let server = started(Bus::server(ANY_PORT, "/_server_bus_", EventBus::new())).await;
    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicI64::new(0));
    let (h, t) = (hits.clone(), total.clone());
    client
        .subscribe_remote(
            "burst",
            move |n: i64| {
                h.fetch_add(1, Ordering::SeqCst);
                t.fetch_add(n, Ordering::SeqCst);
            },
            &server.local_endpoint(),
        )
        .await
        .unwrap();

    let publishers: Vec<_> = (0..PUBLISHES)
        .map(|n| {
            let bus = server.event_bus().share();
            tokio::spawn(async move { bus.publish("burst", args![n]).await.is_ok() })
        })
        .collect();
    for publisher in publishers {
        assert!(publisher.await.unwrap());
    }

    assert_eq!(hits.load(Ordering::SeqCst), PUBLISHES as usize);
    assert_eq!(total.load(Ordering::SeqCst), (0..PUBLISHES).sum::<i64>());

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn non_finite_floats_are_forwarded() {
    let server = started(Bus::server(ANY_PORT, "/_server_bus_", EventBus::new())).await;
    let client = started(Bus::client(ANY_PORT, "/_client_bus_", EventBus::new())).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client
        .subscribe_remote(
            "ratio",
            move |x: f64| sink.lock().unwrap().push(x),
            &server.local_endpoint(),
        )
        .await
        .unwrap();

    for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.5] {
        let report = server.event_bus().publish("ratio", args![x]).await;
        assert!(report.is_ok(), "{report:?}");
    }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    assert!(seen[0].is_nan());
    assert_eq!(&seen[1..], &[f64::INFINITY, f64::NEG_INFINITY, 0.5]);

    client.stop().await;
    server.stop().await;
}
