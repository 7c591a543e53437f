//! Session tests against the mock TDS server.
//!
//! Every test runs a real socket exchange: the mock answers with tokens
//! produced by the protocol encoders and records what the session sent.
//!
//! ```bash
//! RUST_LOG=mssql_client=debug cargo test -p mssql-client --test session
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use bytes::BytesMut;
use mssql_client::{Config, Error, ErrorKind, RpcArg, Session, SessionState};
use mssql_testing::{LoginBehavior, MockResponse, MockTdsServer, RequestKind};
use mssql_codec::CodecError;
use mssql_types::{Numeric, SqlValue, TypeInfo};
use rust_decimal::Decimal;
use tds_protocol::{
    ColMetaData, Column, Done, EncryptionLevel, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType, TdsVersion, TokenType,
};
use tokio::net::TcpStream;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_for(server: &MockTdsServer) -> Config {
    Config::new()
        .host(server.host())
        .port(server.port())
        .user("sa")
        .password("Secret123")
        .autocommit(true)
}

fn users_columns() -> Vec<Column> {
    vec![
        Column::new("id", TypeInfo::int(4)),
        Column::new("name", TypeInfo::nvarchar(50)),
    ]
}

async fn connect(server: &MockTdsServer) -> Session {
    init_tracing();
    Session::connect(config_for(server))
        .await
        .expect("login against mock server")
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_reaches_ready() {
    let server = MockTdsServer::builder()
        .with_server_name("MockSQL")
        .with_database("orders")
        .build()
        .await
        .unwrap();

    let session = connect(&server).await;

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.database(), Some("orders"));
    assert_eq!(session.server_name(), Some("MockSQL"));
    assert_eq!(session.tds_version(), Some(TdsVersion::V7_4));
    assert_eq!(session.packet_size(), Some(4096));
    assert!(!session.in_transaction());
}

#[tokio::test]
async fn test_login_failure_leaves_session_errored() {
    init_tracing();
    let server = MockTdsServer::builder()
        .with_login(LoginBehavior::login_failed("sa"))
        .build()
        .await
        .unwrap();

    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut session = Session::new(stream, config_for(&server)).unwrap();
    let err = session.login().await.unwrap_err();

    match &err {
        Error::Authentication { number, message, .. } => {
            assert_eq!(*number, 18456);
            assert!(message.contains("Login failed"));
        }
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Operational);
    assert_eq!(session.state(), SessionState::Errored);
}

#[tokio::test]
async fn test_login_without_ack_is_rejected() {
    let server = MockTdsServer::builder()
        .with_login(LoginBehavior::NoAck)
        .build()
        .await
        .unwrap();

    let err = Session::connect(config_for(&server)).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { number: 0, .. }));
}

#[tokio::test]
async fn test_required_encryption_is_refused() {
    let server = MockTdsServer::builder()
        .with_encryption(EncryptionLevel::Required)
        .build()
        .await
        .unwrap();

    let err = Session::connect(config_for(&server)).await.unwrap_err();
    assert!(matches!(err, Error::EncryptionRequired));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_packet_size_change_applies() {
    let server = MockTdsServer::builder()
        .with_packet_size(8192)
        .with_default_response(MockResponse::affected(1))
        .build()
        .await
        .unwrap();

    let mut session = connect(&server).await;
    assert_eq!(session.packet_size(), Some(8192));

    // Longer than one packet at either size.
    let sql = format!("INSERT INTO t VALUES ('{}')", "x".repeat(10_000));
    let result = session.execute(&sql).await.unwrap();
    assert_eq!(result.rows_affected(), 1);

    let requests = server.requests().await;
    assert_eq!(requests[0].sql(), Some(sql.as_str()));
}

// =============================================================================
// Result sets
// =============================================================================

#[tokio::test]
async fn test_select_returns_rows() {
    let server = MockTdsServer::builder()
        .with_response(
            "SELECT id, name FROM users",
            MockResponse::rows(
                users_columns(),
                vec![
                    vec![SqlValue::Int(1), SqlValue::String("Alice".into())],
                    vec![SqlValue::Int(2), SqlValue::Null],
                ],
            ),
        )
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session.execute("SELECT id, name FROM users").await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(result.columns().len(), 2);
    assert_eq!(result.rows().len(), 2);
    assert_eq!(result.rows_affected(), 2);

    let first = &result.rows()[0];
    assert_eq!(first.get::<i32>(0).unwrap(), 1);
    assert_eq!(first.get_by_name::<String>("NAME").unwrap(), "Alice");

    let second = &result.rows()[1];
    assert!(second.is_null(1));
    assert_eq!(second.try_get::<String>(1), None);
}

#[tokio::test]
async fn test_multiple_result_sets() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::Batch(vec![
            MockResponse::scalar_int(7),
            MockResponse::affected(4),
            MockResponse::rows(
                users_columns(),
                vec![vec![SqlValue::Int(9), SqlValue::String("Bob".into())]],
            ),
        ]))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session.execute("EXEC report").await.unwrap();

    assert_eq!(result.result_sets().len(), 2);
    assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), 7);
    assert_eq!(result.result_sets()[1].columns()[1].name, "name");
    assert_eq!(result.rows_affected(), 6);
}

#[tokio::test]
async fn test_nbc_row_response() {
    let metadata = ColMetaData::new(users_columns());
    let mut tokens = BytesMut::new();
    metadata.encode(&mut tokens).unwrap();
    metadata
        .encode_nbc_row(&[SqlValue::Null, SqlValue::String("only".into())], &mut tokens)
        .unwrap();
    Done::with_count(1, false).encode(TokenType::Done, &mut tokens);

    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::Raw(tokens.freeze()))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session.execute("SELECT id, name FROM sparse").await.unwrap();
    let row = &result.rows()[0];
    assert!(row.is_null(0));
    assert_eq!(row.get::<String>(1).unwrap(), "only");
}

#[tokio::test]
async fn test_large_response_spans_packets() {
    let rows = (0..300)
        .map(|i| vec![SqlValue::Int(i), SqlValue::String(format!("user-{i:04}"))])
        .collect();
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::rows(users_columns(), rows))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session.execute("SELECT * FROM users").await.unwrap();
    assert_eq!(result.rows().len(), 300);
    assert_eq!(result.rows()[299].get::<String>(1).unwrap(), "user-0299");
}

#[tokio::test]
async fn test_decimal_beyond_28_digits() {
    let nines: Numeric = "9".repeat(38).parse().unwrap();
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::rows(
            vec![Column::new("total", TypeInfo::decimal(38, 0))],
            vec![vec![SqlValue::Numeric(nines)], vec![SqlValue::Decimal(Decimal::from(12))]],
        ))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session.execute("SELECT total FROM ledger").await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    let wide = result.rows()[0].get::<Numeric>(0).unwrap();
    assert_eq!(wide.to_string(), "9".repeat(38));
    assert!(result.rows()[0].get::<Decimal>(0).is_err());
    assert_eq!(
        result.rows()[1].get::<Decimal>(0).unwrap(),
        Decimal::from(12)
    );
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_unrepresentable_value_keeps_session_usable() {
    let metadata = ColMetaData::new(vec![Column::new("total", TypeInfo::decimal(38, 0))]);
    let mut tokens = BytesMut::new();
    metadata.encode(&mut tokens).unwrap();
    // ROW holding 10^38, one digit more than DECIMAL(38) allows.
    tokens.extend_from_slice(&[TokenType::Row as u8, 17, 1]);
    tokens.extend_from_slice(&(10u128.pow(38)).to_le_bytes());
    Done::with_count(1, false).encode(TokenType::Done, &mut tokens);

    let server = MockTdsServer::builder()
        .with_response("SELECT total FROM broken", MockResponse::Raw(tokens.freeze()))
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.execute("SELECT total FROM broken").await.unwrap_err();
    assert!(matches!(err, Error::Conversion(_)), "{err:?}");
    assert!(!err.is_fatal());
    assert_eq!(session.state(), SessionState::Ready);

    let result = session.execute("SELECT 1").await.unwrap();
    assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), 1);
}

#[tokio::test]
async fn test_packet_sequence_gap_is_fatal() {
    let mut tokens = BytesMut::new();
    Done::with_count(1, false).encode(TokenType::Done, &mut tokens);
    let (head, tail) = tokens.split_at(4);

    // Second packet numbered 3 instead of 2.
    let mut wire = BytesMut::new();
    for (id, status, chunk) in [
        (1, PacketStatus::NORMAL, head),
        (3, PacketStatus::END_OF_MESSAGE, tail),
    ] {
        PacketHeader::new(
            PacketType::TabularResult,
            status,
            (PACKET_HEADER_SIZE + chunk.len()) as u16,
        )
        .with_packet_id(id)
        .encode(&mut wire);
        wire.extend_from_slice(chunk);
    }

    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::Wire(wire.freeze()))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.execute("SELECT 1").await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Framing(CodecError::SequenceGap {
                expected: 2,
                actual: 3
            })
        ),
        "{err:?}"
    );
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::Errored);
}

#[tokio::test]
async fn test_server_error_keeps_session_usable() {
    let server = MockTdsServer::builder()
        .with_response(
            "SELECT * FROM nope",
            MockResponse::error(208, "Invalid object name 'nope'."),
        )
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.execute("SELECT * FROM nope").await.unwrap_err();
    assert_eq!(err.number(), Some(208));
    assert_eq!(err.kind(), ErrorKind::Programming);
    assert!(!err.is_fatal());
    assert_eq!(session.state(), SessionState::Ready);

    let result = session.execute("SELECT 1").await.unwrap();
    assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), 1);
}

#[tokio::test]
async fn test_constraint_violation_is_integrity_error() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::Batch(vec![
            MockResponse::affected(1),
            MockResponse::error(2627, "Violation of PRIMARY KEY constraint."),
        ]))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.execute("INSERT INTO t VALUES (1); INSERT INTO t VALUES (1)").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_unknown_token_is_fatal() {
    let metadata = ColMetaData::new(users_columns());
    let mut tokens = BytesMut::new();
    metadata.encode(&mut tokens).unwrap();
    metadata
        .encode_row(&[SqlValue::Int(1), SqlValue::String("a".into())], &mut tokens)
        .unwrap();
    tokens.extend_from_slice(&[0x42, 0x00, 0x00]);

    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::Raw(tokens.freeze()))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::Errored);

    let err = session.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn test_parameter_type_mismatch_sends_nothing() {
    let server = MockTdsServer::builder().build().await.unwrap();
    init_tracing();
    let mut session = Session::connect(config_for(&server).autocommit(false))
        .await
        .unwrap();

    let err = session
        .callproc(
            "dbo.touch",
            vec![RpcArg::named("@id", "not a number").with_type(TypeInfo::int(4))],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TypeMismatch(_)));
    assert_eq!(session.state(), SessionState::Ready);
    assert!(!session.in_transaction());
    assert!(server.requests().await.is_empty());
}

#[tokio::test]
async fn test_command_timeout_is_fatal() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::Hang)
        .build()
        .await
        .unwrap();
    init_tracing();
    let config = config_for(&server).command_timeout(Duration::from_millis(200));
    let mut session = Session::connect(config).await.unwrap();

    let err = session.execute("WAITFOR DELAY '01:00'").await.unwrap_err();
    assert!(matches!(err, Error::CommandTimeout));
    assert_eq!(session.state(), SessionState::Errored);
}

// =============================================================================
// Parameterized queries and procedures
// =============================================================================

#[tokio::test]
async fn test_query_binds_positional_parameters() {
    let sql = "SELECT id, name FROM users WHERE id = @p1 AND name = @p2";
    let server = MockTdsServer::builder()
        .with_response(
            sql,
            MockResponse::rows(
                users_columns(),
                vec![vec![SqlValue::Int(5), SqlValue::String("Eve".into())]],
            ),
        )
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session
        .query(sql, &[SqlValue::Int(5), SqlValue::String("Eve".into())])
        .await
        .unwrap();
    assert_eq!(result.rows()[0].get::<String>(1).unwrap(), "Eve");

    let requests = server.requests().await;
    let RequestKind::Rpc { procedure, params } = &requests[0].kind else {
        panic!("expected rpc, got {:?}", requests[0].kind);
    };
    assert_eq!(procedure, "sp_executesql");
    assert_eq!(params.len(), 4);
    assert_eq!(params[2].name, "@p1");
    assert_eq!(params[2].value, SqlValue::Int(5));
    assert_eq!(params[3].value, SqlValue::String("Eve".into()));
}

#[tokio::test]
async fn test_callproc_output_and_return_status() {
    let server = MockTdsServer::builder()
        .with_response(
            "dbo.count_orders",
            MockResponse::Procedure {
                return_status: 0,
                outputs: vec![("@total".into(), TypeInfo::int(4), SqlValue::Int(42))],
                rows_affected: Some(3),
            },
        )
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session
        .callproc(
            "dbo.count_orders",
            vec![
                RpcArg::named("customer", 7i32),
                RpcArg::named("@total", SqlValue::Null)
                    .with_type(TypeInfo::int(4))
                    .output(),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.return_status(), Some(0));
    assert_eq!(result.rows_affected(), 3);
    assert!(result.rows().is_empty());
    let total = result.get_output("total").expect("output parameter");
    assert_eq!(total.value, SqlValue::Int(42));
    assert_eq!(total.ordinal, 1);

    let requests = server.requests().await;
    let RequestKind::Rpc { params, .. } = &requests[0].kind else {
        panic!("expected rpc");
    };
    assert_eq!(params[0].name, "@customer");
    assert!(!params[0].output);
    assert!(params[1].output);
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_implicit_transaction_and_commit() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::affected(1))
        .build()
        .await
        .unwrap();
    init_tracing();
    let mut session = Session::connect(config_for(&server).autocommit(false))
        .await
        .unwrap();

    session.execute("INSERT INTO t VALUES (1)").await.unwrap();
    assert!(session.in_transaction());
    let descriptor = session.transaction_descriptor();
    assert_ne!(descriptor, 0);

    session.query("UPDATE t SET x = @p1", &[SqlValue::Int(2)]).await.unwrap();
    session.commit().await.unwrap();
    assert!(!session.in_transaction());
    assert_eq!(session.transaction_descriptor(), 0);

    let requests = server.requests().await;
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].kind, RequestKind::Transaction(5));
    assert_eq!(requests[0].transaction_descriptor, 0);
    assert_eq!(requests[1].transaction_descriptor, descriptor);
    assert_eq!(requests[2].transaction_descriptor, descriptor);
    assert_eq!(requests[3].kind, RequestKind::Transaction(7));
    assert_eq!(requests[3].transaction_descriptor, descriptor);
}

#[tokio::test]
async fn test_explicit_rollback() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let mut session = connect(&server).await;

    session.begin().await.unwrap();
    assert!(session.in_transaction());
    // Already active: nothing is sent.
    session.begin().await.unwrap();

    session.execute("DELETE FROM t").await.unwrap();
    session.rollback().await.unwrap();
    assert!(!session.in_transaction());

    let kinds: Vec<_> = server.requests().await.into_iter().map(|r| r.kind).collect();
    assert_eq!(kinds.len(), 3);
    assert_eq!(kinds[0], RequestKind::Transaction(5));
    assert_eq!(kinds[2], RequestKind::Transaction(8));
}

#[tokio::test]
async fn test_commit_without_transaction_is_noop() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let mut session = connect(&server).await;

    session.commit().await.unwrap();
    session.rollback().await.unwrap();
    assert!(server.requests().await.is_empty());
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_autocommit_skips_begin() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let mut session = connect(&server).await;

    session.execute("UPDATE t SET x = 1").await.unwrap();

    let requests = server.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].transaction_descriptor, 0);
    assert!(matches!(requests[0].kind, RequestKind::SqlBatch(_)));
}

// =============================================================================
// Cancellation and shutdown
// =============================================================================

#[tokio::test]
async fn test_cancel_after_dropped_request() {
    let server = MockTdsServer::builder()
        .with_response("WAITFOR DELAY '01:00'", MockResponse::Hang)
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let pending = tokio::time::timeout(
        Duration::from_millis(100),
        session.execute("WAITFOR DELAY '01:00'"),
    )
    .await;
    assert!(pending.is_err());
    assert_eq!(session.state(), SessionState::Executing);

    session.cancel().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    let result = session.execute("SELECT 1").await.unwrap();
    assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), 1);

    let requests = server.requests().await;
    assert_eq!(requests[1].kind, RequestKind::Attention);
}

#[tokio::test]
async fn test_cancel_handle_interrupts_request() {
    let server = MockTdsServer::builder()
        .with_response("WAITFOR DELAY '01:00'", MockResponse::Hang)
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let handle = session.cancel_handle().expect("connected session");
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel().await
    });

    let err = session.execute("WAITFOR DELAY '01:00'").await.unwrap_err();
    assert!(canceller.await.unwrap().unwrap());

    assert!(matches!(err, Error::Cancelled));
    assert!(!err.is_fatal());
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_cancel_when_ready_is_noop() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let mut session = connect(&server).await;

    session.cancel().await.unwrap();
    assert!(server.requests().await.is_empty());
}

#[tokio::test]
async fn test_cancel_handle_while_idle_keeps_responses_in_step() {
    let server = MockTdsServer::builder()
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .with_response("SELECT 2", MockResponse::scalar_int(2))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let handle = session.cancel_handle().expect("connected session");
    assert!(!handle.cancel().await.unwrap());
    assert!(!handle.is_cancelling());

    let first = session.execute("SELECT 1").await.unwrap();
    assert_eq!(first.rows()[0].get::<i32>(0).unwrap(), 1);
    let second = session.execute("SELECT 2").await.unwrap();
    assert_eq!(second.rows()[0].get::<i32>(0).unwrap(), 2);

    assert_eq!(session.state(), SessionState::Ready);
    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.kind != RequestKind::Attention));
}

#[tokio::test]
async fn test_cancel_after_response_arrived_is_noop() {
    let server = MockTdsServer::builder()
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .with_response("SELECT 2", MockResponse::scalar_int(2))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    session.execute("SELECT 1").await.unwrap();
    let handle = session.cancel_handle().expect("connected session");
    assert!(!handle.cancel().await.unwrap());
    session.cancel().await.unwrap();

    let result = session.execute("SELECT 2").await.unwrap();
    assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), 2);
}

#[tokio::test]
async fn test_close_then_use() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let mut session = connect(&server).await;

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    session.close().await;

    let err = session.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            state: SessionState::Closed,
            ..
        }
    ));
}
