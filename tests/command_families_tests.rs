//! End-to-end wire tests for the typed-index, pub/sub, scripting and
//! cluster families.

mod common;

use common::{command, read_reply, send_command, Resp, TestServer};

#[tokio::test]
async fn order_book_zrevrange_with_scores() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(
            &mut conn,
            &["ZADD", "ob", "150.20", "bid:1", "150.15", "bid:2", "-150.25", "ask:1"],
        )
        .await,
        Resp::Integer(3)
    );
    let reply = command(&mut conn, &["ZREVRANGE", "ob", "0", "1", "WITHSCORES"]).await;
    let items: Vec<&str> = reply.as_array().iter().map(Resp::bulk_str).collect();
    assert_eq!(items, vec!["bid:1", "150.2", "bid:2", "150.15"]);

    // Best-bid helper mirrored on the admin surface's source of truth.
    let best = server
        .state
        .keyspace
        .with_sorted("ob", |idx| idx.best_bid())
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(best.0, "bid:1");
}

#[tokio::test]
async fn zset_ranks_ranges_and_counts() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    command(&mut conn, &["ZADD", "lb", "10", "alice", "20", "bob", "20", "carol"]).await;
    assert_eq!(
        command(&mut conn, &["ZRANK", "lb", "alice"]).await,
        Resp::Integer(0)
    );
    // Tie at 20 breaks lexicographically: bob before carol.
    assert_eq!(
        command(&mut conn, &["ZRANK", "lb", "carol"]).await,
        Resp::Integer(2)
    );
    assert_eq!(
        command(&mut conn, &["ZREVRANK", "lb", "carol"]).await,
        Resp::Integer(0)
    );
    assert_eq!(
        command(&mut conn, &["ZRANK", "lb", "nobody"]).await,
        Resp::Null
    );
    assert_eq!(
        command(&mut conn, &["ZCARD", "lb"]).await,
        Resp::Integer(3)
    );
    assert_eq!(
        command(&mut conn, &["ZCOUNT", "lb", "15", "+inf"]).await,
        Resp::Integer(2)
    );
    let reply = command(&mut conn, &["ZRANGEBYSCORE", "lb", "(10", "20"]).await;
    let members: Vec<&str> = reply.as_array().iter().map(Resp::bulk_str).collect();
    assert_eq!(members, vec!["bob", "carol"]);

    assert_eq!(
        command(&mut conn, &["ZINCRBY", "lb", "5.5", "alice"]).await,
        Resp::Bulk(b"15.5".to_vec())
    );
    assert_eq!(
        command(&mut conn, &["ZSCORE", "lb", "alice"]).await,
        Resp::Bulk(b"15.5".to_vec())
    );
    assert_eq!(
        command(&mut conn, &["ZREM", "lb", "alice", "ghost"]).await,
        Resp::Integer(1)
    );
}

#[tokio::test]
async fn zrange_full_and_reverse_are_duals() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    command(&mut conn, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]).await;
    let forward = command(&mut conn, &["ZRANGE", "z", "0", "-1"]).await;
    let mut forward: Vec<String> = forward
        .as_array()
        .iter()
        .map(|r| r.bulk_str().to_string())
        .collect();
    let reverse = command(&mut conn, &["ZREVRANGE", "z", "0", "-1"]).await;
    let reverse: Vec<String> = reverse
        .as_array()
        .iter()
        .map(|r| r.bulk_str().to_string())
        .collect();
    forward.reverse();
    assert_eq!(forward, reverse);
}

#[tokio::test]
async fn cardinality_small_counts_are_exact() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["PFADD", "d", "tx1", "tx2", "tx3", "tx1"]).await,
        Resp::Integer(1)
    );
    assert_eq!(command(&mut conn, &["PFCOUNT", "d"]).await, Resp::Integer(3));

    // Re-adding the same elements changes nothing.
    assert_eq!(
        command(&mut conn, &["PFADD", "d", "tx1", "tx2"]).await,
        Resp::Integer(0)
    );

    command(&mut conn, &["PFADD", "e", "tx3", "tx4"]).await;
    assert_eq!(
        command(&mut conn, &["PFCOUNT", "d", "e"]).await,
        Resp::Integer(4)
    );
    assert_eq!(
        command(&mut conn, &["PFMERGE", "merged", "d", "e"]).await,
        Resp::Simple("OK".into())
    );
    assert_eq!(
        command(&mut conn, &["PFCOUNT", "merged"]).await,
        Resp::Integer(4)
    );
}

#[tokio::test]
async fn geo_distance_and_radius() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["GEOADD", "g", "-122.4194", "37.7749", "a"]).await,
        Resp::Integer(1)
    );
    command(&mut conn, &["GEOADD", "g", "-122.4313", "37.7739", "b"]).await;

    let distance: f64 = command(&mut conn, &["GEODIST", "g", "a", "b", "km"])
        .await
        .bulk_str()
        .parse()
        .expect("distance parses");
    assert!((1.0..=1.5).contains(&distance), "distance was {distance}");

    // Symmetry on the wire.
    let reverse: f64 = command(&mut conn, &["GEODIST", "g", "b", "a", "km"])
        .await
        .bulk_str()
        .parse()
        .unwrap();
    assert!((distance - reverse).abs() < 1e-6);

    let radius = command(&mut conn, &["GEORADIUS", "g", "-122.4194", "37.7749", "2", "km"]).await;
    let names: Vec<&str> = radius.as_array().iter().map(Resp::bulk_str).collect();
    assert_eq!(names, vec!["a", "b"]);

    let by_member =
        command(&mut conn, &["GEORADIUSBYMEMBER", "g", "b", "2", "km"]).await;
    let names: Vec<&str> = by_member.as_array().iter().map(Resp::bulk_str).collect();
    assert!(names.contains(&"a"));

    let hash = command(&mut conn, &["GEOHASH", "g", "a"]).await;
    let hash = hash.as_array()[0].bulk_str();
    assert_eq!(hash.len(), 12);
    assert!(hash.starts_with("9q8yy"));

    assert_eq!(
        command(&mut conn, &["GEOADD", "g", "999", "0", "bad"]).await,
        Resp::Error("ERR longitude 999 out of range [-180, 180]".into())
    );
}

#[tokio::test]
async fn pubsub_fan_out_reaches_all_subscribers() {
    let server = TestServer::spawn().await;
    let mut sub1 = server.connect().await;
    let mut sub2 = server.connect().await;
    let mut publisher = server.connect().await;

    let ack = command(&mut sub1, &["SUBSCRIBE", "md"]).await;
    assert_eq!(
        ack,
        Resp::Array(vec![
            Resp::Bulk(b"subscribe".to_vec()),
            Resp::Bulk(b"md".to_vec()),
            Resp::Integer(1),
        ])
    );
    command(&mut sub2, &["SUBSCRIBE", "md"]).await;

    assert_eq!(
        command(&mut publisher, &["PUBLISH", "md", "AAPL:150.25"]).await,
        Resp::Integer(2)
    );

    for sub in [&mut sub1, &mut sub2] {
        let delivery = read_reply(sub).await;
        assert_eq!(
            delivery,
            Resp::Array(vec![
                Resp::Bulk(b"message".to_vec()),
                Resp::Bulk(b"md".to_vec()),
                Resp::Bulk(b"AAPL:150.25".to_vec()),
            ])
        );
    }
}

#[tokio::test]
async fn pattern_subscription_delivers_pmessage() {
    let server = TestServer::spawn().await;
    let mut sub = server.connect().await;
    let mut publisher = server.connect().await;

    command(&mut sub, &["PSUBSCRIBE", "md.*"]).await;
    assert_eq!(
        command(&mut publisher, &["PUBLISH", "md.AAPL", "150"]).await,
        Resp::Integer(1)
    );
    let delivery = read_reply(&mut sub).await;
    assert_eq!(
        delivery,
        Resp::Array(vec![
            Resp::Bulk(b"pmessage".to_vec()),
            Resp::Bulk(b"md.*".to_vec()),
            Resp::Bulk(b"md.AAPL".to_vec()),
            Resp::Bulk(b"150".to_vec()),
        ])
    );

    // Unsubscribe stops delivery and acknowledges with the new count.
    let ack = command(&mut sub, &["PUNSUBSCRIBE", "md.*"]).await;
    assert_eq!(
        ack,
        Resp::Array(vec![
            Resp::Bulk(b"punsubscribe".to_vec()),
            Resp::Bulk(b"md.*".to_vec()),
            Resp::Integer(0),
        ])
    );
    assert_eq!(
        command(&mut publisher, &["PUBLISH", "md.AAPL", "151"]).await,
        Resp::Integer(0)
    );
}

#[tokio::test]
async fn subscriber_disconnect_is_removed_from_fan_out() {
    let server = TestServer::spawn().await;
    let mut sub = server.connect().await;
    let mut publisher = server.connect().await;

    command(&mut sub, &["SUBSCRIBE", "md"]).await;
    drop(sub);
    // The bus either sees the closed queue immediately or on first
    // publish; either way the count settles at zero.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    command(&mut publisher, &["PUBLISH", "md", "x"]).await;
    assert_eq!(
        command(&mut publisher, &["PUBLISH", "md", "y"]).await,
        Resp::Integer(0)
    );
}

#[tokio::test]
async fn eval_runs_scripts_with_keys_and_argv() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["EVAL", "return 1 + 2", "0"]).await,
        Resp::Integer(3)
    );
    assert_eq!(
        command(
            &mut conn,
            &["EVAL", "set(KEYS[1], ARGV[1])\nreturn get(KEYS[1])", "1", "risk:user:7", "0.81"],
        )
        .await,
        Resp::Bulk(b"0.81".to_vec())
    );
    // The write is visible to plain commands afterwards.
    assert_eq!(
        command(&mut conn, &["GET", "risk:user:7"]).await,
        Resp::Bulk(b"0.81".to_vec())
    );

    match command(&mut conn, &["EVAL", "return frobnicate()", "0"]).await {
        Resp::Error(message) => assert!(message.starts_with("ERR"), "got {message}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn script_load_and_evalsha() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    let digest = command(&mut conn, &["SCRIPT", "LOAD", "return ARGV[1] .. '!'"]).await;
    let digest = digest.bulk_str().to_string();
    assert_eq!(digest.len(), 64);

    assert_eq!(
        command(&mut conn, &["EVALSHA", &digest, "0", "alert"]).await,
        Resp::Bulk(b"alert!".to_vec())
    );
    match command(&mut conn, &["EVALSHA", "deadbeef", "0"]).await {
        Resp::Error(message) => assert!(message.starts_with("NOSCRIPT")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn cluster_keyslot_is_deterministic() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    let first = command(&mut conn, &["CLUSTER", "KEYSLOT", "user:123"]).await;
    let second = command(&mut conn, &["CLUSTER", "KEYSLOT", "user:123"]).await;
    assert_eq!(first, second);
    match first {
        Resp::Integer(slot) => assert!((0..16384).contains(&slot)),
        other => panic!("unexpected {other:?}"),
    }

    let info = command(&mut conn, &["CLUSTER", "INFO"]).await;
    assert!(info.bulk_str().contains("cluster_enabled:0"));
}

#[tokio::test]
async fn cluster_mode_single_node_owns_all_slots() {
    use fincache::config::{ClusterConfig, ServerConfig};

    let server = TestServer::spawn_with(ServerConfig {
        http_port: 0,
        cluster: ClusterConfig {
            enabled: true,
            node_id: Some("node-test".into()),
            ..ClusterConfig::default()
        },
        ..ServerConfig::default()
    })
    .await;
    let mut conn = server.connect().await;

    let info = command(&mut conn, &["CLUSTER", "INFO"]).await;
    let text = info.bulk_str();
    assert!(text.contains("cluster_enabled:1"));
    assert!(text.contains("cluster_state:ok"));
    assert!(text.contains("cluster_slots_assigned:16384"));

    let nodes = command(&mut conn, &["CLUSTER", "NODES"]).await;
    assert!(nodes.bulk_str().contains("node-test"));

    let slots = command(&mut conn, &["CLUSTER", "SLOTS"]).await;
    let ranges = slots.as_array();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].as_array()[0], Resp::Integer(0));
    assert_eq!(ranges[0].as_array()[1], Resp::Integer(16383));

    // Every key is locally served on a single-node cluster.
    assert_eq!(
        command(&mut conn, &["SET", "anything", "v"]).await,
        Resp::Simple("OK".into())
    );

    // Pipelining and subscriptions still work in cluster mode.
    send_command(&mut conn, &["GET", "anything"]).await;
    assert_eq!(read_reply(&mut conn).await, Resp::Bulk(b"v".to_vec()));
}
