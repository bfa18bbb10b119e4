//! Integration tests for the engine gateways against a fake kdb+ process.
//!
//! The fake server speaks just enough IPC: it accepts the handshake, decodes
//! each sync char-vector query and answers with a value, a q error, or by
//! hanging up.

use kdb_mcp_server::config::{EngineConfig, EngineMode};
use kdb_mcp_server::engine::codec::{self, CAPABILITY, HEADER_SIZE, Header, MessageType};
use kdb_mcp_server::engine::{Engine, Gateway, TableRegistry};
use kdb_mcp_server::error::{ErrorKind, KdbError};
use kdb_mcp_server::models::{ComposedQuery, QAtom, QValue};
use kdb_mcp_server::tools::Dispatcher;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

enum Reply {
    Value(QValue),
    Error(&'static str),
    Delayed(Duration, QValue),
    Hangup,
}

type Responder = fn(&str) -> Reply;

struct FakeKdb {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl FakeKdb {
    async fn start(respond: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, respond));
            }
        });
        Self { addr, accepted }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    fn config(&self, mode: EngineMode) -> Arc<EngineConfig> {
        let mut config = EngineConfig::parse(&format!("kdb://{}", self.addr)).unwrap();
        config.mode = mode;
        config.connect_timeout = Duration::from_secs(2);
        Arc::new(config)
    }
}

async fn read_handshake(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    loop {
        if stream.read_exact(&mut byte).await.is_err() {
            return false;
        }
        if byte[0] == 0 {
            return true;
        }
    }
}

async fn serve(mut stream: TcpStream, respond: Responder) {
    if !read_handshake(&mut stream).await || stream.write_all(&[CAPABILITY]).await.is_err() {
        return;
    }
    loop {
        let mut header = [0u8; HEADER_SIZE];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = Header::unpack(&header).unwrap().length as usize;
        let mut message = header.to_vec();
        message.resize(length, 0);
        if stream.read_exact(&mut message[HEADER_SIZE..]).await.is_err() {
            return;
        }
        let query = match codec::decode_message(&message).unwrap() {
            QValue::CharVector(q) => q,
            other => panic!("expected a char vector query, got {other:?}"),
        };
        let reply = match respond(&query) {
            Reply::Value(value) => codec::encode_message(MessageType::Response, &value).unwrap(),
            Reply::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                codec::encode_message(MessageType::Response, &value).unwrap()
            }
            Reply::Error(msg) => codec::encode_error(msg).unwrap(),
            Reply::Hangup => return,
        };
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn stocks_engine(query: &str) -> Reply {
    match query {
        "tables[]" => Reply::Value(QValue::symbols(["stocks"])),
        "count stocks" => Reply::Value(QValue::long(42)),
        "crash" => Reply::Hangup,
        "slow" => Reply::Delayed(
            Duration::from_millis(300),
            QValue::Atom(QAtom::Symbol("slow_result".to_string())),
        ),
        _ => Reply::Error("type"),
    }
}

fn query(text: &str) -> ComposedQuery {
    ComposedQuery::screened(text).unwrap()
}

// =========================================================================
// Remote mode
// =========================================================================

#[tokio::test]
async fn test_remote_count_round_trip() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Remote));

    let value = gateway.execute(&query("count stocks")).await.unwrap();
    assert_eq!(value, QValue::long(42));
    assert_eq!(gateway.open_connections().await, 0);
}

#[tokio::test]
async fn test_remote_connection_per_request() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Remote));

    for _ in 0..3 {
        gateway.execute(&query("count stocks")).await.unwrap();
    }
    assert_eq!(server.accepted(), 3);
    assert_eq!(gateway.open_connections().await, 0);
}

#[tokio::test]
async fn test_remote_engine_error_releases_connection() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Remote));

    let err = gateway.execute(&query("1+`a")).await.unwrap_err();
    assert!(matches!(err, KdbError::Engine { ref message } if message == "type"));
    assert_eq!(gateway.open_connections().await, 0);
}

#[tokio::test]
async fn test_remote_hangup_mid_call_releases_connection() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Remote));

    let err = gateway.execute(&query("crash")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(gateway.open_connections().await, 0);

    // Next call is unaffected.
    assert_eq!(
        gateway.execute(&query("count stocks")).await.unwrap(),
        QValue::long(42)
    );
}

#[tokio::test]
async fn test_remote_refused_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = EngineConfig::parse(&format!("kdb://{addr}")).unwrap();
    let gateway = Gateway::from_config(Arc::new(config));
    let err = gateway.execute(&query("count stocks")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    let text = err.to_string();
    assert!(text.starts_with("Connection error"));
    assert!(text.contains(&addr.port().to_string()));
    assert_eq!(gateway.open_connections().await, 0);
}

#[tokio::test]
async fn test_query_timeout_names_endpoint() {
    let server = FakeKdb::start(stocks_engine).await;
    let mut config = (*server.config(EngineMode::Remote)).clone();
    config.query_timeout = Some(Duration::from_millis(50));
    let gateway = Gateway::from_config(Arc::new(config));

    let err = gateway.execute(&query("slow")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    let text = err.to_string();
    assert!(text.contains("query timed out"), "{text}");
    assert!(text.contains(&format!("({})", server.addr)), "{text}");
    assert!(text.contains("kdb+ process is running"), "{text}");
    assert_eq!(gateway.open_connections().await, 0);
}

#[tokio::test]
async fn test_handshake_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            read_handshake(&mut stream).await;
            // close without replying: q's answer to bad credentials
        }
    });

    let config = EngineConfig::parse(&format!("kdb://bob:wrong@{addr}")).unwrap();
    let gateway = Gateway::from_config(Arc::new(config));
    let err = gateway.execute(&query("count stocks")).await.unwrap_err();
    assert!(err.to_string().contains("handshake rejected"));
}

// =========================================================================
// Session mode
// =========================================================================

#[tokio::test]
async fn test_session_reuses_one_connection() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Session));
    assert_eq!(gateway.open_connections().await, 0);

    for _ in 0..3 {
        gateway.execute(&query("count stocks")).await.unwrap();
    }
    assert_eq!(server.accepted(), 1);
    assert_eq!(gateway.open_connections().await, 1);

    gateway.close().await;
    assert_eq!(gateway.open_connections().await, 0);
}

#[tokio::test]
async fn test_session_keeps_connection_after_q_error() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Session));

    assert!(gateway.execute(&query("1+`a")).await.is_err());
    gateway.execute(&query("count stocks")).await.unwrap();
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_session_reconnects_after_broken_handle() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Session));

    gateway.execute(&query("count stocks")).await.unwrap();
    let err = gateway.execute(&query("crash")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(gateway.open_connections().await, 0);

    gateway.execute(&query("count stocks")).await.unwrap();
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn test_session_cancelled_call_does_not_leak_response() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Gateway::from_config(server.config(EngineMode::Session));

    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), gateway.execute(&query("slow"))).await;
    assert!(cancelled.is_err());
    assert_eq!(gateway.open_connections().await, 0);

    // The late answer to `slow` must not be read as this call's result.
    assert_eq!(
        gateway.execute(&query("count stocks")).await.unwrap(),
        QValue::long(42)
    );
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn test_session_concurrent_calls_serialize() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Arc::new(Gateway::from_config(server.config(EngineMode::Session)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway.execute(&query("count stocks")).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), QValue::long(42));
    }
    assert_eq!(server.accepted(), 1);
}

// =========================================================================
// Through the dispatcher
// =========================================================================

#[tokio::test]
async fn test_table_count_end_to_end() {
    let server = FakeKdb::start(stocks_engine).await;
    let gateway = Arc::new(Gateway::from_config(server.config(EngineMode::Remote)));
    let dispatcher = Dispatcher::new(gateway.clone(), Arc::new(TableRegistry::new()));

    let args = json!({"table_name": "stocks"});
    let response = dispatcher
        .dispatch("table_count", args.as_object().unwrap())
        .await;

    assert!(!response.is_error, "{}", response.text);
    assert_eq!(response.text, "Table 'stocks' has 42 rows");
    assert_eq!(gateway.open_connections().await, 0);
}

#[tokio::test]
async fn test_engine_down_reported_as_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = EngineConfig::parse(&format!("kdb://{addr}")).unwrap();
    let dispatcher = Dispatcher::new(
        Arc::new(Gateway::from_config(Arc::new(config))),
        Arc::new(TableRegistry::new()),
    );
    let response = dispatcher
        .dispatch("list_tables", &serde_json::Map::new())
        .await;
    assert!(response.is_error);
    assert!(response.text.starts_with("Connection error"));
}
