//! End-to-end wire tests for the connection and keyspace families.

mod common;

use common::{command, Resp, TestServer};

#[tokio::test]
async fn set_get_del_round_trip() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["SET", "foo", "bar"]).await,
        Resp::Simple("OK".into())
    );
    assert_eq!(
        command(&mut conn, &["GET", "foo"]).await,
        Resp::Bulk(b"bar".to_vec())
    );
    assert_eq!(command(&mut conn, &["DEL", "foo"]).await, Resp::Integer(1));
    assert_eq!(command(&mut conn, &["GET", "foo"]).await, Resp::Null);
}

#[tokio::test]
async fn ping_and_echo() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["PING"]).await,
        Resp::Simple("PONG".into())
    );
    assert_eq!(
        command(&mut conn, &["ECHO", "hello"]).await,
        Resp::Bulk(b"hello".to_vec())
    );
}

#[tokio::test]
async fn set_with_ttl_and_expiry_observability() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["SET", "mortal", "v", "EX", "100"]).await,
        Resp::Simple("OK".into())
    );
    match command(&mut conn, &["TTL", "mortal"]).await {
        Resp::Integer(ttl) => assert!((1..=100).contains(&ttl), "ttl was {ttl}"),
        other => panic!("unexpected {other:?}"),
    }

    // Sub-second expiry via PX, then observe absence.
    assert_eq!(
        command(&mut conn, &["SET", "flash", "v", "PX", "50"]).await,
        Resp::Simple("OK".into())
    );
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    assert_eq!(command(&mut conn, &["GET", "flash"]).await, Resp::Null);
    assert_eq!(
        command(&mut conn, &["EXISTS", "flash"]).await,
        Resp::Integer(0)
    );
    assert_eq!(
        command(&mut conn, &["TTL", "flash"]).await,
        Resp::Integer(-2)
    );
}

#[tokio::test]
async fn ttl_sentinels_and_expire() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    command(&mut conn, &["SET", "k", "v"]).await;
    assert_eq!(command(&mut conn, &["TTL", "k"]).await, Resp::Integer(-1));
    assert_eq!(
        command(&mut conn, &["EXPIRE", "k", "60"]).await,
        Resp::Integer(1)
    );
    match command(&mut conn, &["TTL", "k"]).await {
        Resp::Integer(ttl) => assert!((1..=60).contains(&ttl)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        command(&mut conn, &["EXPIRE", "ghost", "60"]).await,
        Resp::Integer(0)
    );
}

#[tokio::test]
async fn keys_pattern_and_flush() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    command(&mut conn, &["MSET", "user:1", "a", "user:2", "b", "order:1", "c"]).await;
    let reply = command(&mut conn, &["KEYS", "user:*"]).await;
    let names: Vec<&str> = reply.as_array().iter().map(Resp::bulk_str).collect();
    assert_eq!(names, vec!["user:1", "user:2"]);

    assert_eq!(
        command(&mut conn, &["FLUSHDB"]).await,
        Resp::Simple("OK".into())
    );
    assert_eq!(
        command(&mut conn, &["EXISTS", "user:1", "user:2", "order:1"]).await,
        Resp::Integer(0)
    );
}

#[tokio::test]
async fn mget_mixes_hits_and_nulls() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    command(&mut conn, &["SET", "a", "1"]).await;
    command(&mut conn, &["SETEX", "b", "90", "2"]).await;
    let reply = command(&mut conn, &["MGET", "a", "missing", "b"]).await;
    assert_eq!(
        reply,
        Resp::Array(vec![
            Resp::Bulk(b"1".to_vec()),
            Resp::Null,
            Resp::Bulk(b"2".to_vec()),
        ])
    );
}

#[tokio::test]
async fn wire_errors_are_canonical() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["NOSUCHCMD"]).await,
        Resp::Error("ERR unknown command 'NOSUCHCMD'".into())
    );
    assert_eq!(
        command(&mut conn, &["GET"]).await,
        Resp::Error("ERR wrong number of arguments for 'get' command".into())
    );
    assert_eq!(
        command(&mut conn, &["EXPIRE", "k", "soon"]).await,
        Resp::Error("ERR value is not an integer or out of range".into())
    );

    // Type mismatch leaves the connection usable.
    command(&mut conn, &["ZADD", "board", "1", "alice"]).await;
    match command(&mut conn, &["GET", "board"]).await {
        Resp::Error(message) => assert!(message.starts_with("WRONGTYPE")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        command(&mut conn, &["PING"]).await,
        Resp::Simple("PONG".into())
    );
}

#[tokio::test]
async fn pipelined_requests_answer_in_order() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    // Three commands in one write.
    common::send_command(&mut conn, &["SET", "p", "1"]).await;
    common::send_command(&mut conn, &["GET", "p"]).await;
    common::send_command(&mut conn, &["DEL", "p"]).await;
    assert_eq!(common::read_reply(&mut conn).await, Resp::Simple("OK".into()));
    assert_eq!(
        common::read_reply(&mut conn).await,
        Resp::Bulk(b"1".to_vec())
    );
    assert_eq!(common::read_reply(&mut conn).await, Resp::Integer(1));
}

#[tokio::test]
async fn info_has_sections() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    command(&mut conn, &["SET", "k", "v"]).await;
    let info = command(&mut conn, &["INFO"]).await;
    let text = info.bulk_str();
    assert!(text.contains("# Server"));
    assert!(text.contains("# Keyspace"));
    assert!(text.contains("# Memory"));
}

#[tokio::test]
async fn quit_closes_after_ok() {
    let server = TestServer::spawn().await;
    let mut conn = server.connect().await;

    assert_eq!(
        command(&mut conn, &["QUIT"]).await,
        Resp::Simple("OK".into())
    );
    // Server closes its end; the next read returns EOF.
    use tokio::io::AsyncReadExt;
    let mut byte = [0u8; 1];
    let n = conn.read(&mut byte).await.unwrap_or(0);
    assert_eq!(n, 0);
}
