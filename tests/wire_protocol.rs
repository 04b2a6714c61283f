use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roombook::tenant::TenantManager;
use roombook::wire;

const DATE: &str = "2026-10-20";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roombook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "roombook".to_string(), 15, None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("roombook")
        .password("roombook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn create_room(client: &Client, open: &str, close: &str) -> Ulid {
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO resources (id, name, open, close) VALUES ('{rid}', 'Room {rid}', {open}, {close})"
        ))
        .await
        .unwrap();
    rid
}

fn insert_booking(rid: Ulid, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO bookings (id, resource_id, "date", start, "end") VALUES ('{}', '{rid}', '{DATE}', {start}, {end})"#,
        Ulid::new()
    )
}

fn free_spans(rows: &[SimpleQueryRow]) -> Vec<(String, String)> {
    rows.iter()
        .map(|r| (r.get("start").unwrap().to_string(), r.get("end").unwrap().to_string()))
        .collect()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_resource_and_list() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "'08:00 AM'", "'04:00 PM'").await;

    let listed = rows(&client, "SELECT * FROM resources").await;
    let row = listed.iter().find(|r| r.get("id") == Some(rid.to_string().as_str())).unwrap();
    assert_eq!(row.get("open"), Some("480"));
    assert_eq!(row.get("close"), Some("960"));
    assert_eq!(row.get("hours"), Some("08:00 AM - 04:00 PM"));
    assert_eq!(row.get("enabled"), Some("t"));
}

#[tokio::test]
async fn availability_follows_bookings() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "480", "960").await;

    client.batch_execute(&insert_booking(rid, "'09:00 AM'", "'11:00 AM'")).await.unwrap();

    let free = rows(
        &client,
        &format!(r#"SELECT * FROM availability WHERE resource_id = '{rid}' AND "date" = '{DATE}'"#),
    )
    .await;
    assert_eq!(
        free_spans(&free),
        vec![("480".into(), "540".into()), ("660".into(), "960".into())]
    );
    assert_eq!(free[0].get("label"), Some("08:00 AM - 09:00 AM"));

    let long = rows(
        &client,
        &format!(
            r#"SELECT * FROM availability WHERE resource_id = '{rid}' AND "date" = '{DATE}' AND min_duration = 120"#
        ),
    )
    .await;
    assert_eq!(free_spans(&long), vec![("660".into(), "960".into())]);
}

#[tokio::test]
async fn rejections_map_to_sqlstates() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "480", "960").await;
    client.batch_execute(&insert_booking(rid, "540", "600")).await.unwrap();

    let overlap = client.batch_execute(&insert_booking(rid, "570", "585")).await.unwrap_err();
    assert_eq!(overlap.code(), Some(&SqlState::EXCLUSION_VIOLATION));

    let inverted = client.batch_execute(&insert_booking(rid, "600", "600")).await.unwrap_err();
    assert_eq!(inverted.code(), Some(&SqlState::INVALID_PARAMETER_VALUE));

    let outside = client.batch_execute(&insert_booking(rid, "420", "500")).await.unwrap_err();
    assert_eq!(outside.code(), Some(&SqlState::INVALID_PARAMETER_VALUE));

    let bad_time = client
        .batch_execute(&insert_booking(rid, "'25:00 PM'", "600"))
        .await
        .unwrap_err();
    assert_eq!(bad_time.code(), Some(&SqlState::SYNTAX_ERROR));

    let unknown = client.batch_execute(&insert_booking(Ulid::new(), "540", "600")).await.unwrap_err();
    assert_eq!(unknown.code(), Some(&SqlState::RAISE_EXCEPTION));

    // adjacent booking is fine
    client.batch_execute(&insert_booking(rid, "600", "660")).await.unwrap();
}

#[tokio::test]
async fn concurrent_clients_cannot_double_book() {
    let addr = start_test_server().await;
    let setup = connect(addr).await;
    let rid = create_room(&setup, "480", "960").await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client.batch_execute(&insert_booking(rid, "'01:00 PM'", "'02:00 PM'")).await
        }));
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(err.code(), Some(&SqlState::EXCLUSION_VIOLATION));
}

#[tokio::test]
async fn booking_lifecycle_and_listing() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "480", "960").await;

    let bid = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, resource_id, "date", start, "end", participants) VALUES ('{bid}', '{rid}', '{DATE}', 540, 600, '[{{"name":"Ada"}}]')"#
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!("INSERT INTO booking_status (id, status) VALUES ('{bid}', 'Approved')"))
        .await
        .unwrap();

    let listed = rows(&client, &format!("SELECT * FROM bookings WHERE resource_id = '{rid}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("status"), Some("2"));
    assert_eq!(listed[0].get("status_label"), Some("Approved"));
    assert_eq!(listed[0].get("time"), Some("09:00 AM - 10:00 AM"));
    assert!(listed[0].get("participants").unwrap().contains("Ada"));
    assert!(["Upcoming", "Ongoing", "Finished"].contains(&listed[0].get("state").unwrap()));

    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{bid}'"))
        .await
        .unwrap();
    let listed = rows(&client, &format!("SELECT * FROM bookings WHERE resource_id = '{rid}'")).await;
    assert_eq!(listed[0].get("status_label"), Some("Deactivated"));

    // interval is free again
    client.batch_execute(&insert_booking(rid, "540", "600")).await.unwrap();
}

#[tokio::test]
async fn slot_queries() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "540", "660").await;
    client.batch_execute(&insert_booking(rid, "570", "600")).await.unwrap();

    let starts = rows(
        &client,
        &format!(r#"SELECT * FROM slots WHERE resource_id = '{rid}' AND "date" = '{DATE}'"#),
    )
    .await;
    let minutes: Vec<_> = starts.iter().map(|r| r.get("minute").unwrap().to_string()).collect();
    assert_eq!(minutes, ["540", "555", "600", "615", "630", "645"]);

    let ends = rows(
        &client,
        &format!(r#"SELECT * FROM slots WHERE resource_id = '{rid}' AND "date" = '{DATE}' AND start = '09:00 AM'"#),
    )
    .await;
    let labels: Vec<_> = ends.iter().map(|r| r.get("label").unwrap().to_string()).collect();
    assert_eq!(labels, ["09:15 AM", "09:30 AM"]);
}

#[tokio::test]
async fn closed_room_takes_no_bookings() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "480", "960").await;
    client
        .batch_execute(&format!("DELETE FROM resources WHERE id = '{rid}'"))
        .await
        .unwrap();

    let err = client.batch_execute(&insert_booking(rid, "540", "600")).await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));

    let listed = rows(&client, "SELECT * FROM resources").await;
    let row = listed.iter().find(|r| r.get("id") == Some(rid.to_string().as_str())).unwrap();
    assert_eq!(row.get("enabled"), Some("f"));
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "480", "960").await;

    let rid_str = rid.to_string();
    let bid = Ulid::new().to_string();
    client
        .execute(
            r#"INSERT INTO bookings (id, resource_id, "date", start, "end") VALUES ($1, $2, $3, $4, $5)"#,
            &[&bid, &rid_str, &DATE, &"10:00 AM", &"11:00 AM"],
        )
        .await
        .unwrap();

    let free = client
        .query(
            r#"SELECT * FROM availability WHERE resource_id = $1 AND "date" = $2"#,
            &[&rid_str, &DATE],
        )
        .await
        .unwrap();
    let labels: Vec<&str> = free.iter().map(|r| r.get("label")).collect();
    assert_eq!(labels, ["08:00 AM - 10:00 AM", "11:00 AM - 04:00 PM"]);
}

#[tokio::test]
async fn parameter_values_are_bound_verbatim() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_room(&client, "480", "960").await;

    let rid_str = rid.to_string();
    let bid = Ulid::new().to_string();
    let participants = r#"[{"name":"$1 team","company":"O'Hara & $2"}]"#;
    client
        .execute(
            r#"INSERT INTO bookings (id, resource_id, "date", start, "end", participants) VALUES ($1, $2, $3, $4, $5, $6)"#,
            &[&bid, &rid_str, &DATE, &"540", &"600", &participants],
        )
        .await
        .unwrap();

    let listed = rows(&client, &format!("SELECT * FROM bookings WHERE resource_id = '{rid}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(bid.as_str()));
    let stored = listed[0].get("participants").unwrap();
    assert!(stored.contains("$1 team"), "participants were rewritten: {stored}");
    assert!(stored.contains("O'Hara & $2"), "participants were rewritten: {stored}");
}

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let addr = start_test_server().await;
    let a = connect(addr).await;
    let rid = create_room(&a, "480", "960").await;

    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("other")
        .user("roombook")
        .password("roombook");
    let (b, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let listed = rows(&b, "SELECT * FROM resources").await;
    assert!(listed.iter().all(|r| r.get("id") != Some(rid.to_string().as_str())));
}
