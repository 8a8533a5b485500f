//! Session behavior against a scripted server

mod common;

use std::sync::atomic::Ordering;

use common::{
    DROPPED_TABLE_OID, FakeServer, RETIRED_TYPE_OID, USERS_TABLE_OID, WIDGET_TYPE_OID,
};
use pgsession::{ConnStatus, Error, ExecStatus, FetchMode, TransactionStatus};

#[test]
fn connect_reports_session_parameters() {
    let server = FakeServer::start();
    let conn = server.connect();

    assert_eq!(conn.host().unwrap(), "127.0.0.1");
    assert_eq!(conn.user().unwrap(), "tester");
    assert_eq!(conn.dbname().unwrap(), "app");
    assert_eq!(conn.server_version().unwrap(), Some("16.2"));
    assert_eq!(conn.client_encoding().unwrap(), "UTF8");
    assert_eq!(conn.connection_status().unwrap(), ConnStatus::Ok);
    assert_eq!(conn.transaction_status().unwrap(), TransactionStatus::Idle);
    assert!(conn.backend_pid().unwrap() >= 1000);
    assert_eq!(server.shared.count("SELECT oid, typname FROM pg_type"), 1);
}

#[test]
fn connect_failure_is_a_connection_error() {
    let server = FakeServer::start();
    let conninfo = server.conninfo();
    // Nothing listens on port 1
    let err = pgsession::connect("host=127.0.0.1 port=1 user=x sslmode=disable").unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{:?}", err);
    assert!(pgsession::connect(&format!("{} bogus='unterminated", conninfo)).is_err());
}

#[test]
fn fetch_returns_each_row_then_none() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let result = conn.query("SELECT id, name FROM users").unwrap().unwrap();
    assert_eq!(result.status(), ExecStatus::TuplesOk);
    assert_eq!(result.num_rows(), 3);

    let mut seen = Vec::new();
    while let Some(row) = result.fetch_row() {
        seen.push(row[0].map(<[u8]>::to_vec));
    }
    assert_eq!(seen.len(), 3);
    assert!(result.fetch_row().is_none());
    assert!(result.fetch_assoc().is_none());
}

#[test]
fn seek_agrees_with_fetch_all() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let result = conn.query("SELECT id, name FROM users").unwrap().unwrap();
    let all = result.fetch_all();
    assert_eq!(all.len(), 3);
    for (k, expected) in all.iter().enumerate() {
        assert!(result.result_seek(k));
        assert_eq!(&result.fetch_assoc().unwrap(), expected);
    }
    assert_eq!(all[2]["name"], None);
}

#[test]
fn assoc_keys_match_field_num() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let result = conn.query("SELECT id, name FROM users").unwrap().unwrap();
    let record = result.fetch_array(FetchMode::Both).unwrap();
    for column in result.columns() {
        let index = result.field_num(&column.name).unwrap();
        assert_eq!(
            record.get_by_name(&column.name).unwrap(),
            record.get(index).unwrap()
        );
    }
}

#[test]
fn create_insert_select() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let created = conn
        .query("CREATE TABLE users (id int, name text)")
        .unwrap()
        .unwrap();
    assert_eq!(created.status(), ExecStatus::CommandOk);
    assert_eq!(created.command_tag(), Some("CREATE TABLE"));

    let inserted = conn
        .query("INSERT INTO users VALUES (1, 'alice'), (2, 'bob'), (3, NULL)")
        .unwrap()
        .unwrap();
    assert_eq!(inserted.affected_rows(), Some(3));

    let selected = conn.query("SELECT id, name FROM users").unwrap().unwrap();
    assert_eq!(selected.field_name(1).unwrap(), "name");
    assert_eq!(selected.field_type(0).unwrap(), "int4");
    assert_eq!(selected.field_type(1).unwrap(), "text");
    assert_eq!(selected.get_value(1, 1).unwrap(), Some(&b"bob"[..]));
    assert!(selected.get_is_null(2, 1).unwrap());
}

#[test]
fn multi_statement_keeps_last_result() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let result = conn.query("SELECT 1; SELECT 2").unwrap().unwrap();
    assert_eq!(result.get_value(0, 0).unwrap(), Some(&b"2"[..]));
}

#[test]
fn server_error_is_a_query_error() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let err = conn.query("SELEC 1").unwrap_err();
    match err {
        Error::Query(e) => {
            assert_eq!(e.status, ExecStatus::FatalError);
            assert_eq!(e.fields.code.as_deref(), Some("42601"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(conn.last_error().unwrap().unwrap().contains("syntax error"));
    // The session is still usable
    assert!(conn.query("SELECT 1").unwrap().is_some());
}

#[test]
fn empty_query_is_an_error() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let err = conn.query("").unwrap_err();
    assert!(matches!(err, Error::Query(ref e) if e.status == ExecStatus::EmptyQuery));
}

#[test]
fn query_params_and_null() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let result = conn.query_params("SELECT $1", &[], &[Some("hello")]).unwrap().unwrap();
    assert_eq!(result.get_value(0, 0).unwrap(), Some(&b"hello"[..]));

    let result = conn.query_params("SELECT $1", &[25], &[None]).unwrap().unwrap();
    assert!(result.get_is_null(0, 0).unwrap());
}

#[test]
fn prepare_then_execute() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let prepared = conn.prepare("add_user", "INSERT INTO users VALUES ($1, $2)", &[]).unwrap().unwrap();
    assert_eq!(prepared.status(), ExecStatus::CommandOk);

    let executed = conn
        .execute_prepared("add_user", &[Some("4"), Some("dora")])
        .unwrap()
        .unwrap();
    assert_eq!(executed.status(), ExecStatus::CommandOk);
    assert_eq!(executed.affected_rows(), Some(1));
    assert_eq!(executed.num_fields(), 0);
}

#[test]
fn send_query_refuses_while_results_pending() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    conn.send_query("SELECT 1").unwrap();
    assert!(matches!(conn.send_query("SELECT 2"), Err(Error::ResultsPending)));
    assert!(matches!(conn.query("SELECT 2"), Err(Error::ResultsPending)));
    assert_eq!(conn.transaction_status().unwrap(), TransactionStatus::Active);

    let first = conn.get_result().unwrap().unwrap();
    assert_eq!(first.get_value(0, 0).unwrap(), Some(&b"1"[..]));
    assert!(conn.get_result().unwrap().is_none());
    assert!(conn.get_result().unwrap().is_none());

    conn.send_query("SELECT 2").unwrap();
    let second = conn.get_result().unwrap().unwrap();
    assert_eq!(second.get_value(0, 0).unwrap(), Some(&b"2"[..]));
    assert!(conn.get_result().unwrap().is_none());
}

#[test]
fn send_query_returns_every_result() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    conn.send_query("SELECT 1; SELEC 2").unwrap();
    let ok = conn.get_result().unwrap().unwrap();
    assert_eq!(ok.status(), ExecStatus::TuplesOk);
    let failed = conn.get_result().unwrap().unwrap();
    assert_eq!(failed.status(), ExecStatus::FatalError);
    assert!(failed.error_message().contains("syntax error"));
    assert_eq!(failed.error_field(b'C').as_deref(), Some("42601"));
    assert!(conn.get_result().unwrap().is_none());
}

#[test]
fn send_prepare_and_execute() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    conn.send_prepare("echo", "SELECT $1", &[25]).unwrap();
    assert_eq!(conn.get_result().unwrap().unwrap().status(), ExecStatus::CommandOk);
    assert!(conn.get_result().unwrap().is_none());

    conn.send_execute("echo", &[Some("x")]).unwrap();
    let result = conn.get_result().unwrap().unwrap();
    assert_eq!(result.get_value(0, 0).unwrap(), Some(&b"x"[..]));
    assert!(conn.get_result().unwrap().is_none());
}

#[test]
fn notifications_are_queued() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    assert!(conn.notifies().unwrap().is_none());
    conn.query("NOTIFY jobs, 'ready'").unwrap();
    let n = conn.notifies().unwrap().unwrap();
    assert_eq!(n.channel, "jobs");
    assert_eq!(n.payload, "ready");
    assert_eq!(n.pid, conn.backend_pid().unwrap());
    assert!(conn.notifies().unwrap().is_none());
}

#[test]
fn close_is_idempotent() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let result = conn.query("SELECT id, name FROM users").unwrap().unwrap();
    assert!(conn.close());
    assert!(!conn.close());
    assert!(conn.is_closed());

    assert!(matches!(conn.query("SELECT 1"), Err(Error::ConnectionClosed)));
    assert!(matches!(conn.send_query("SELECT 1"), Err(Error::ConnectionClosed)));
    assert!(matches!(conn.host(), Err(Error::ConnectionClosed)));
    assert!(matches!(conn.escape_literal("x"), Err(Error::ConnectionClosed)));
    assert!(matches!(
        conn.set_error_verbosity(pgsession::Verbosity::Verbose),
        Err(Error::ConnectionClosed)
    ));
    assert!(!conn.ping());

    // Rows outlive the connection, type names do not
    assert_eq!(result.get_value(0, 1).unwrap(), Some(&b"alice"[..]));
    assert!(matches!(result.field_type(0), Err(Error::ConnectionClosed)));
}

#[test]
fn type_names_are_cached_until_forced() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let first = conn.get_field_name(WIDGET_TYPE_OID, false).unwrap();
    assert_eq!(first.as_deref(), Some("widget_v1"));
    let cached = conn.get_field_name(WIDGET_TYPE_OID, false).unwrap();
    assert_eq!(cached, first);

    let forced = conn.get_field_name(WIDGET_TYPE_OID, true).unwrap();
    assert_eq!(forced.as_deref(), Some("widget_v2"));

    // Results see the refreshed cache
    let result = conn.query("SELECT widget").unwrap().unwrap();
    assert_eq!(result.field_type(0).unwrap(), "widget_v2");

    assert_eq!(conn.get_field_name(424242, false).unwrap(), None);
    assert_eq!(conn.get_field_name(23, false).unwrap().as_deref(), Some("int4"));
}

#[test]
fn forced_lookup_forgets_dropped_names() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    assert_eq!(
        conn.get_field_table(DROPPED_TABLE_OID, false).unwrap().as_deref(),
        Some("dropped_soon")
    );
    assert_eq!(
        conn.get_field_table(DROPPED_TABLE_OID, false).unwrap().as_deref(),
        Some("dropped_soon")
    );
    assert_eq!(conn.get_field_table(DROPPED_TABLE_OID, true).unwrap(), None);
    assert_eq!(conn.get_field_table(DROPPED_TABLE_OID, false).unwrap(), None);

    assert_eq!(
        conn.get_field_name(RETIRED_TYPE_OID, false).unwrap().as_deref(),
        Some("retired_type")
    );
    assert_eq!(conn.get_field_name(RETIRED_TYPE_OID, true).unwrap(), None);
    assert_eq!(conn.get_field_name(RETIRED_TYPE_OID, false).unwrap(), None);
}

#[test]
fn table_names_resolve() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let result = conn.query("SELECT id, name FROM users").unwrap().unwrap();
    assert_eq!(result.field_table_oid(0).unwrap(), USERS_TABLE_OID);
    assert_eq!(conn.field_table(&result, 0, false).unwrap().as_deref(), Some("users"));
    assert_eq!(conn.get_field_table(USERS_TABLE_OID, false).unwrap().as_deref(), Some("users"));

    let lookups = server
        .shared
        .count("SELECT oid, relname FROM pg_class WHERE oid = $1");
    assert_eq!(lookups, 1);
    conn.get_field_table(USERS_TABLE_OID, true).unwrap();
    assert_eq!(
        server.shared.count("SELECT oid, relname FROM pg_class WHERE oid = $1"),
        2
    );
}

#[test]
fn lost_session_is_reset_and_retried_once() {
    let server = FakeServer::start();
    let mut conn = server.connect();
    let pid = conn.backend_pid().unwrap();

    let result = conn.query("SELECT flaky").unwrap().unwrap();
    assert_eq!(result.get_value(0, 0).unwrap(), Some(&b"ok"[..]));
    assert_ne!(conn.backend_pid().unwrap(), pid);
    assert_eq!(server.shared.count("SELECT flaky"), 2);
    assert_eq!(conn.connection_status().unwrap(), ConnStatus::Ok);
}

#[test]
fn dead_session_fails_after_one_retry() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let err = conn.query("SELECT doomed").unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{:?}", err);
    assert!(err.is_connection_error());
    assert_eq!(server.shared.count("SELECT doomed"), 2);

    // The next statement gets a fresh session
    assert!(conn.query("SELECT 1").unwrap().is_some());
    assert_eq!(conn.connection_status().unwrap(), ConnStatus::Ok);
}

#[test]
fn send_query_redispatches_on_a_dead_session() {
    let server = FakeServer::start();
    let mut conn = server.connect();
    let pid = conn.backend_pid().unwrap();

    conn.send_query("SELECT doomed").unwrap();
    assert!(conn.get_result().unwrap_err().is_connection_error());
    assert_eq!(conn.connection_status().unwrap(), ConnStatus::Bad);
    assert_eq!(conn.transaction_status().unwrap(), TransactionStatus::Unknown);

    conn.send_query("SELECT 1").unwrap();
    assert_ne!(conn.backend_pid().unwrap(), pid);
    let result = conn.get_result().unwrap().unwrap();
    assert_eq!(result.get_value(0, 0).unwrap(), Some(&b"1"[..]));
    assert!(conn.get_result().unwrap().is_none());
    assert_eq!(server.shared.count("SELECT doomed"), 1);
}

#[test]
fn ping_and_reset() {
    let server = FakeServer::start();
    let mut conn = server.connect();
    let pid = conn.backend_pid().unwrap();

    assert!(conn.ping());
    assert!(conn.reset().unwrap());
    assert_ne!(conn.backend_pid().unwrap(), pid);
    assert!(conn.query("SELECT 1").unwrap().is_some());
}

#[test]
fn cancel_uses_a_separate_socket() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    conn.send_query("SELECT 1").unwrap();
    conn.cancel_query().unwrap();
    assert_eq!(server.shared.cancels.load(Ordering::SeqCst), 1);
    // Remaining results were discarded
    assert!(conn.get_result().unwrap().is_none());
    assert!(conn.query("SELECT 1").unwrap().is_some());
}

#[test]
fn cancel_tolerates_a_reply_on_the_cancel_socket() {
    let server = FakeServer::start();
    server.shared.chatty_cancel.store(true, Ordering::SeqCst);
    let mut conn = server.connect();

    conn.send_query("SELECT 1").unwrap();
    conn.cancel_query().unwrap();
    assert_eq!(server.shared.cancels.load(Ordering::SeqCst), 1);
    assert!(conn.get_result().unwrap().is_none());
}

#[test]
fn quoting_requires_an_open_connection() {
    let server = FakeServer::start();
    let conn = server.connect();

    assert_eq!(conn.escape_literal("it's").unwrap(), "'it''s'");
    assert_eq!(conn.escape_identifier("Users").unwrap(), "\"Users\"");
    assert_eq!(conn.escape_bytea(&[0xde, 0xad]).unwrap(), "\\xdead");
    assert_eq!(conn.unescape_bytea(b"\\xdead").unwrap(), vec![0xde, 0xad]);
}

#[test]
fn error_verbosity_changes_rendering() {
    let server = FakeServer::start();
    let mut conn = server.connect();

    let previous = conn.set_error_verbosity(pgsession::Verbosity::Terse).unwrap();
    assert_eq!(previous, pgsession::Verbosity::Default);
    conn.send_query("SELEC 1").unwrap();
    let failed = conn.get_result().unwrap().unwrap();
    assert_eq!(failed.error_message(), "ERROR:  syntax error");
    conn.get_result().unwrap();
}

#[test]
fn version_names_the_crate() {
    assert!(pgsession::version().starts_with("pgsession "));
}
