//! Shared helpers: spawn a server on an ephemeral port and speak RESP.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use fincache::config::ServerConfig;
use fincache::server::{AppState, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// A running test server.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(ServerConfig {
            // Port 0 everywhere: the wire listener is bound explicitly
            // below, and the HTTP surface picks its own free port.
            http_port: 0,
            ..ServerConfig::default()
        })
        .await
    }

    pub async fn spawn_with(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let server = Server::new(config).expect("server builds");
        let state = server.state();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = server.run_with_listener(listener, token).await;
        });
        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.expect("connect")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One parsed RESP reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Resp {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Resp>),
}

impl Resp {
    pub fn bulk_str(&self) -> &str {
        match self {
            Resp::Bulk(data) => std::str::from_utf8(data).expect("utf-8 bulk"),
            other => panic!("expected bulk, got {other:?}"),
        }
    }

    pub fn as_array(&self) -> &[Resp] {
        match self {
            Resp::Array(items) => items,
            other => panic!("expected array, got {other:?}"),
        }
    }
}

/// Send one command and read one reply.
pub async fn command(stream: &mut TcpStream, args: &[&str]) -> Resp {
    send_command(stream, args).await;
    read_reply(stream).await
}

pub async fn send_command(stream: &mut TcpStream, args: &[&str]) {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    stream.write_all(&out).await.expect("write command");
}

pub async fn read_reply(stream: &mut TcpStream) -> Resp {
    let mut reader = ReplyReader {
        stream,
        buf: Vec::new(),
        pos: 0,
    };
    reader.parse().await
}

struct ReplyReader<'a> {
    stream: &'a mut TcpStream,
    buf: Vec<u8>,
    pos: usize,
}

impl ReplyReader<'_> {
    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await.expect("read reply");
        assert!(n > 0, "connection closed mid-reply");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    async fn line(&mut self) -> String {
        loop {
            if let Some(nl) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let end = self.pos + nl;
                assert!(end > self.pos && self.buf[end - 1] == b'\r', "missing CR");
                let line = String::from_utf8(self.buf[self.pos..end - 1].to_vec()).expect("utf-8");
                self.pos = end + 1;
                return line;
            }
            self.fill().await;
        }
    }

    async fn exact(&mut self, len: usize) -> Vec<u8> {
        while self.buf.len() < self.pos + len + 2 {
            self.fill().await;
        }
        let data = self.buf[self.pos..self.pos + len].to_vec();
        assert_eq!(&self.buf[self.pos + len..self.pos + len + 2], b"\r\n");
        self.pos += len + 2;
        data
    }

    fn parse_boxed<'s>(
        &'s mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Resp> + 's>> {
        Box::pin(self.parse_inner())
    }

    async fn parse(&mut self) -> Resp {
        self.parse_inner().await
    }

    async fn parse_inner(&mut self) -> Resp {
        let line = self.line().await;
        let (kind, rest) = line.split_at(1);
        match kind {
            "+" => Resp::Simple(rest.to_string()),
            "-" => Resp::Error(rest.to_string()),
            ":" => Resp::Integer(rest.parse().expect("integer reply")),
            "$" => {
                let len: i64 = rest.parse().expect("bulk length");
                if len < 0 {
                    Resp::Null
                } else {
                    Resp::Bulk(self.exact(len as usize).await)
                }
            },
            "*" => {
                let count: usize = rest.parse().expect("array length");
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let item = self.parse_boxed().await;
                    items.push(item);
                }
                Resp::Array(items)
            },
            other => panic!("unknown reply kind '{other}'"),
        }
    }
}
