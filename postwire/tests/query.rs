use std::time::Duration;

use postwire::{
    ClosedReason, Connection, ErrorKind, QueryError, SessionState, TypeDecodeError, Value,
    connection::TransactionStatus,
    postgres::pg_type::{BOOL, INT4, INT8, TEXT},
};

mod support;
use support::*;

#[test]
fn select_row() {
    run(async {
        let server = serve(|query| {
            assert_eq!(query.sql, "SELECT id, name, is_active FROM users WHERE id = $1");
            assert_eq!(query.params, [Some("1".to_owned())]);
            rows(
                &[("id", INT4), ("name", TEXT), ("is_active", BOOL)],
                &[&[Some("1"), Some("Alice"), Some("t")]],
                "SELECT 1",
            )
        })
        .await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let res = conn
            .execute("SELECT id, name, is_active FROM users WHERE id = $1", &[Value::Int(1)])
            .await
            .unwrap();

        assert_eq!(res.len(), 1);
        assert_eq!(res.columns().len(), 3);
        assert_eq!(res.command_tag().unwrap().as_str(), "SELECT 1");
        assert_eq!(res.rows_affected(), Some(1));

        let row = &res.rows()[0];
        assert_eq!(row.value("id").unwrap(), Some(&Value::Int(1)));
        assert_eq!(row.value("name").unwrap(), Some(&Value::Text("Alice".into())));
        assert_eq!(row.value(2).unwrap(), Some(&Value::Bool(true)));
        assert_eq!(row.try_get::<_, i32>("id").unwrap(), 1);

        let users = res.decode::<(i64, String, bool)>().unwrap();
        assert_eq!(users, [(1, "Alice".to_owned(), true)]);

        assert_eq!(conn.state(), &SessionState::Ready);
        conn.close().await.unwrap();
        assert_eq!(server.finish().await, b"PBDESX");
    })
}

#[test]
fn select_no_rows() {
    run(async {
        let server = serve(|_| rows(&[("id", INT4)], &[], "SELECT 0")).await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let res = conn.execute("SELECT id FROM users WHERE false", &[]).await.unwrap();

        assert!(res.is_empty());
        assert_eq!(res.columns()[0].name, "id");
        assert_eq!(res.rows_affected(), Some(0));

        conn.close().await.unwrap();
    })
}

#[test]
fn server_error_keeps_connection() {
    run(async {
        let server = serve(|query| match query.sql.as_str() {
            "SELECT 1/0" => failure("22012", "division by zero"),
            _ => rows(&[("?column?", INT4)], &[&[Some("1")]], "SELECT 1"),
        })
        .await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let err = conn.execute("SELECT 1/0", &[]).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.code(), Some("22012"));
        match err.kind() {
            ErrorKind::Query(QueryError::Server(db)) => {
                assert_eq!(db.severity(), "ERROR");
                assert_eq!(db.message(), "division by zero");
            },
            kind => panic!("expected server error, found {kind:?}"),
        }
        assert_eq!(conn.state(), &SessionState::Ready);

        let res = conn.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(res.rows()[0].try_get::<_, i64>(0).unwrap(), 1);

        conn.close().await.unwrap();
    })
}

#[test]
fn null_values() {
    run(async {
        let server = serve(|query| {
            assert_eq!(query.params, [None, Some("x".to_owned())]);
            rows(&[("a", INT8), ("b", TEXT)], &[&[None, Some("x")]], "SELECT 1")
        })
        .await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let res = conn
            .execute("SELECT $1::int8 AS a, $2::text AS b", &[Value::Null, "x".into()])
            .await
            .unwrap();

        let row = &res.rows()[0];
        assert_eq!(row.value("a").unwrap(), None);
        assert_eq!(row.try_get::<_, Option<i64>>("a").unwrap(), None);
        assert_eq!(row.try_get::<_, Option<String>>("b").unwrap().as_deref(), Some("x"));
        assert!(matches!(row.try_get::<_, i64>("a"), Err(TypeDecodeError::Null)));
        assert!(matches!(row.value("c"), Err(TypeDecodeError::ColumnNotFound(_))));

        conn.close().await.unwrap();
    })
}

#[test]
fn command_without_rows() {
    run(async {
        let server = serve(|query| match query.sql.as_str() {
            "" => {
                let mut out = parse_complete();
                out.extend(bind_complete());
                out.extend(no_data());
                out.extend(empty_query());
                out.extend(ready(b'T'));
                Reply::Send(out)
            },
            _ => rows(&[], &[], "INSERT 0 3"),
        })
        .await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let res = conn
            .execute("INSERT INTO users(name) VALUES ('a'),('b'),('c')", &[])
            .await
            .unwrap();
        assert!(res.is_empty());
        assert!(res.columns().is_empty());
        assert_eq!(res.command_tag().unwrap().command(), "INSERT");
        assert_eq!(res.rows_affected(), Some(3));

        let res = conn.execute("", &[]).await.unwrap();
        assert!(res.command_tag().is_none());
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::InTransaction));

        conn.close().await.unwrap();
    })
}

#[test]
fn notice_is_skipped() {
    run(async {
        let server = serve(|_| {
            let mut out = notice("relation already exists, skipping");
            out.extend(parse_complete());
            out.extend(bind_complete());
            out.extend(no_data());
            out.extend(parameter_status("TimeZone", "UTC"));
            out.extend(command_complete("CREATE TABLE"));
            out.extend(ready(b'I'));
            Reply::Send(out)
        })
        .await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let res = conn.execute("CREATE TABLE IF NOT EXISTS t(id int)", &[]).await.unwrap();
        assert_eq!(res.command_tag().unwrap().as_str(), "CREATE TABLE");
        assert_eq!(res.rows_affected(), None);
        assert_eq!(conn.parameter("TimeZone"), Some("UTC"));

        conn.close().await.unwrap();
    })
}

#[test]
fn param_mismatch_sends_nothing() {
    run(async {
        let server = serve(|_| unreachable!("nothing should be sent")).await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let err = conn.execute("SELECT $1, $2", &[Value::Int(1)]).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Query(QueryError::ParamCount { expect: 2, found: 1 })
        ));
        assert!(!err.is_fatal());
        assert_eq!(conn.state(), &SessionState::Ready);

        conn.close().await.unwrap();
        assert_eq!(server.finish().await, b"X");
    })
}

#[test]
fn dropped_query_is_busy() {
    run(async {
        let server = serve(|_| Reply::Stall).await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let timeout = tokio::time::timeout(
            Duration::from_millis(100),
            conn.execute("SELECT pg_sleep(60)", &[]),
        );
        assert!(timeout.await.is_err());
        assert_eq!(conn.state(), &SessionState::QueryInFlight);

        let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Busy));

        drop(conn);
        // only the first statement reached the server
        assert_eq!(server.finish().await, b"PBDES");
    })
}

#[test]
fn strict_types() {
    run(async {
        let numeric = 1700;
        let server = serve(move |_| rows(&[("n", numeric)], &[&[Some("1.50")]], "SELECT 1")).await;

        let mut conn = Connection::connect(&server.config()).await.unwrap();
        let res = conn.execute("SELECT 1.50::numeric AS n", &[]).await.unwrap();
        assert_eq!(res.rows()[0].value("n").unwrap(), Some(&Value::Text("1.50".into())));
        conn.close().await.unwrap();
        server.finish().await;

        let server = serve(move |_| rows(&[("n", numeric)], &[&[Some("1.50")]], "SELECT 1")).await;
        let mut conn = Connection::connect(&server.config().strict_types(true)).await.unwrap();
        let err = conn.execute("SELECT 1.50::numeric AS n", &[]).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Decode(TypeDecodeError::UnknownOid(1700))));
        assert!(!err.is_fatal());
        assert_eq!(conn.state(), &SessionState::Ready);

        conn.execute("SELECT 1.50::numeric AS n", &[]).await.unwrap_err();
        conn.close().await.unwrap();
    })
}

#[test]
fn notification_is_ignored() {
    run(async {
        let server = serve(|_| {
            let mut notification = 4242u32.to_be_bytes().to_vec();
            notification.extend(b"chan\0payload\0");

            let mut out = parse_complete();
            out.extend(bind_complete());
            out.extend(row_description(&[("n", INT4)]));
            out.extend(message(b'A', &notification));
            out.extend(data_row(&[Some("1")]));
            out.extend(command_complete("SELECT 1"));
            out.extend(ready(b'I'));
            Reply::Send(out)
        })
        .await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let res = conn.execute("SELECT 1 AS n", &[]).await.unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res.rows()[0].value("n").unwrap(), Some(&Value::Int(1)));
        assert_eq!(conn.state(), &SessionState::Ready);

        conn.close().await.unwrap();
        assert_eq!(server.finish().await, b"PBDESX");
    })
}

#[test]
fn unknown_message_at_startup_is_ignored() {
    run(async {
        let mut notification = 4242u32.to_be_bytes().to_vec();
        notification.extend(b"chan\0payload\0");
        let setup = Setup { before_ready: message(b'A', &notification), ..Setup::default() };

        let server = serve_with(setup, |_| rows(&[("n", INT4)], &[&[Some("7")]], "SELECT 1")).await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();
        assert_eq!(conn.state(), &SessionState::Ready);
        assert_eq!(conn.backend_key_data().unwrap().process_id, 4242);

        let res = conn.execute("SELECT 7 AS n", &[]).await.unwrap();
        assert_eq!(res.rows()[0].try_get::<_, i64>("n").unwrap(), 7);
        conn.close().await.unwrap();
    })
}

#[test]
fn truncated_message_fails_connection() {
    run(async {
        let server = serve(|_| {
            let mut out = parse_complete();
            // ReadyForQuery without its status byte
            out.extend(message(b'Z', &[]));
            Reply::Send(out)
        })
        .await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        assert!(err.is_fatal());
        assert!(matches!(conn.state(), SessionState::Failed { .. }));

        let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ConnectionClosed(ClosedReason::Failed(_))));

        conn.close().await.unwrap();
        assert_eq!(conn.state(), &SessionState::Closed);
    })
}

#[test]
fn server_closed_mid_query() {
    run(async {
        let server = serve(|_| Reply::Close(parse_complete())).await;
        let mut conn = Connection::connect(&server.config()).await.unwrap();

        let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ConnectionClosed(ClosedReason::Eof)));
        assert!(matches!(conn.state(), SessionState::Failed { .. }));

        server.finish().await;
    })
}
