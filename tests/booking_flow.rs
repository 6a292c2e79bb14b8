use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use lendit::tenant::TenantManager;
use lendit::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("lendit_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "lendit".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

/// Connect as a given actor. The connection `user` IS the acting user id.
async fn connect_as(addr: SocketAddr, tenant: &str, actor: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(tenant)
        .user(actor)
        .password("lendit");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;
const NOW: i64 = 1_700_000_000_000;

/// Seed two users and one item owned by the first. Returns (owner, booker, item_id).
async fn seed(addr: SocketAddr, tenant: &str) -> (Ulid, Ulid, Ulid) {
    let owner = Ulid::new();
    let booker = Ulid::new();
    let item_id = Ulid::new();

    let owner_conn = connect_as(addr, tenant, &owner.to_string()).await;
    owner_conn
        .batch_execute(&format!(
            "INSERT INTO users (id, name, email) VALUES ('{owner}', 'Owner', 'owner@example.com')"
        ))
        .await
        .unwrap();
    owner_conn
        .batch_execute(&format!(
            "INSERT INTO users (id, name, email) VALUES ('{booker}', 'Booker', 'booker@example.com')"
        ))
        .await
        .unwrap();
    owner_conn
        .batch_execute(&format!(
            "INSERT INTO items (id, name, description, available) VALUES ('{item_id}', 'Drill', 'cordless drill', true)"
        ))
        .await
        .unwrap();
    (owner, booker, item_id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_booking_lifecycle() {
    let (addr, _tm) = start_test_server().await;
    let (owner, booker, item_id) = seed(addr, "lifecycle").await;

    let owner_conn = connect_as(addr, "lifecycle", &owner.to_string()).await;
    let booker_conn = connect_as(addr, "lifecycle", &booker.to_string()).await;

    // Booker requests [now+1h, now+1d] → WAITING
    let booking_id = Ulid::new();
    booker_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{booking_id}', '{item_id}', {}, {})"#,
            NOW + HOUR,
            NOW + DAY
        ))
        .await
        .unwrap();

    let fetched = rows(
        booker_conn
            .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].get("status"), Some("WAITING"));

    // Owner approves → APPROVED
    owner_conn
        .batch_execute(&format!(
            "UPDATE bookings SET approved = true WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();

    let fetched = rows(
        booker_conn
            .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(fetched[0].get("status"), Some("APPROVED"));
    assert_eq!(fetched[0].get("booker_id"), Some(booker.to_string().as_str()));

    // A third user cannot even see it
    let stranger = Ulid::new();
    owner_conn
        .batch_execute(&format!(
            "INSERT INTO users (id, name, email) VALUES ('{stranger}', 'Stranger', 's@example.com')"
        ))
        .await
        .unwrap();
    let stranger_conn = connect_as(addr, "lifecycle", &stranger.to_string()).await;
    let err = stranger_conn
        .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking_id}'"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"), "got: {err}");
}

#[tokio::test]
async fn second_decision_is_refused() {
    let (addr, _tm) = start_test_server().await;
    let (owner, booker, item_id) = seed(addr, "terminal").await;

    let owner_conn = connect_as(addr, "terminal", &owner.to_string()).await;
    let booker_conn = connect_as(addr, "terminal", &booker.to_string()).await;

    let booking_id = Ulid::new();
    booker_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{booking_id}', '{item_id}', {}, {})"#,
            NOW + HOUR,
            NOW + 2 * HOUR
        ))
        .await
        .unwrap();

    owner_conn
        .batch_execute(&format!(
            "UPDATE bookings SET approved = false WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();

    let err = owner_conn
        .batch_execute(&format!(
            "UPDATE bookings SET approved = true WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already REJECTED"), "got: {err}");

    let fetched = rows(
        booker_conn
            .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(fetched[0].get("status"), Some("REJECTED"));
}

#[tokio::test]
async fn overlapping_booking_conflicts_over_wire() {
    let (addr, _tm) = start_test_server().await;
    let (owner, booker, item_id) = seed(addr, "conflict").await;

    let owner_conn = connect_as(addr, "conflict", &owner.to_string()).await;
    let booker_conn = connect_as(addr, "conflict", &booker.to_string()).await;

    let first = Ulid::new();
    booker_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{first}', '{item_id}', {NOW}, {})"#,
            NOW + HOUR + HOUR / 2
        ))
        .await
        .unwrap();
    owner_conn
        .batch_execute(&format!(
            "UPDATE bookings SET approved = true WHERE id = '{first}'"
        ))
        .await
        .unwrap();

    // Overlapping window from another user → conflict carrying the blocker
    let err = booker_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{}', '{item_id}', {}, {})"#,
            Ulid::new(),
            NOW + HOUR,
            NOW + 2 * HOUR
        ))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("window already booked"), "got: {msg}");
    assert!(msg.contains(&first.to_string()), "got: {msg}");
}

#[tokio::test]
async fn booking_listing_states_over_wire() {
    let (addr, _tm) = start_test_server().await;
    let (owner, booker, item_id) = seed(addr, "listing").await;

    let owner_conn = connect_as(addr, "listing", &owner.to_string()).await;
    let booker_conn = connect_as(addr, "listing", &booker.to_string()).await;

    // One booking straddling NOW
    let booking_id = Ulid::new();
    booker_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{booking_id}', '{item_id}', {}, {})"#,
            NOW - HOUR,
            NOW + HOUR
        ))
        .await
        .unwrap();

    let current = rows(
        booker_conn
            .simple_query(&format!(
                "SELECT * FROM bookings WHERE state = 'CURRENT' AND now = {NOW}"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(current.len(), 1);

    let past = rows(
        booker_conn
            .simple_query(&format!(
                "SELECT * FROM bookings WHERE state = 'PAST' AND now = {NOW}"
            ))
            .await
            .unwrap(),
    );
    assert!(past.is_empty());

    // Owner view sees it too
    let owner_view = rows(
        owner_conn
            .simple_query(&format!(
                "SELECT * FROM bookings WHERE state = 'ALL' AND role = 'owner' AND now = {NOW}"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(owner_view.len(), 1);

    // Unknown state is a bad request naming the raw value
    let err = booker_conn
        .simple_query("SELECT * FROM bookings WHERE state = 'SOMEDAY'")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown state: SOMEDAY"), "got: {err}");
}

#[tokio::test]
async fn summaries_and_owner_only_decoration() {
    let (addr, _tm) = start_test_server().await;
    let (owner, booker, item_id) = seed(addr, "summaries").await;

    let owner_conn = connect_as(addr, "summaries", &owner.to_string()).await;
    let booker_conn = connect_as(addr, "summaries", &booker.to_string()).await;

    // Approved bookings at NOW-2d, NOW-1d, NOW+1d
    let mut booking_ids = Vec::new();
    for start in [NOW - 2 * DAY, NOW - DAY, NOW + DAY] {
        let id = Ulid::new();
        booker_conn
            .batch_execute(&format!(
                r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{id}', '{item_id}', {start}, {})"#,
                start + HOUR
            ))
            .await
            .unwrap();
        owner_conn
            .batch_execute(&format!("UPDATE bookings SET approved = true WHERE id = '{id}'"))
            .await
            .unwrap();
        booking_ids.push(id);
    }

    let summaries = rows(
        owner_conn
            .simple_query(&format!(
                "SELECT * FROM booking_summaries WHERE item_id = '{item_id}' AND now = {NOW}"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(summaries.len(), 1);
    let row = &summaries[0];
    assert_eq!(row.get("last_booking_id"), Some(booking_ids[1].to_string().as_str()));
    assert_eq!(row.get("next_booking_id"), Some(booking_ids[2].to_string().as_str()));
    assert_eq!(row.get("rent_count"), Some("3"));

    // The owner's item listing carries the summary...
    let owned = rows(owner_conn.simple_query("SELECT * FROM items").await.unwrap());
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].get("rent_count"), Some("3"));

    // ...while the booker's detail view of the same item is bare
    let detail = rows(
        booker_conn
            .simple_query(&format!("SELECT * FROM items WHERE id = '{item_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(detail[0].get("rent_count"), None);
    assert_eq!(detail[0].get("last_booking_id"), None);
}

#[tokio::test]
async fn search_is_blind_to_booking_state() {
    let (addr, _tm) = start_test_server().await;
    let (owner, booker, item_id) = seed(addr, "search").await;

    let owner_conn = connect_as(addr, "search", &owner.to_string()).await;
    let booker_conn = connect_as(addr, "search", &booker.to_string()).await;

    let bid = Ulid::new();
    booker_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{bid}', '{item_id}', {}, {})"#,
            NOW - DAY,
            NOW - DAY + HOUR
        ))
        .await
        .unwrap();
    owner_conn
        .batch_execute(&format!("UPDATE bookings SET approved = true WHERE id = '{bid}'"))
        .await
        .unwrap();

    let found = rows(
        booker_conn
            .simple_query("SELECT * FROM items WHERE search = 'drill'")
            .await
            .unwrap(),
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some(item_id.to_string().as_str()));
    // Search results never expose booking summaries, even to the owner
    let found_by_owner = rows(
        owner_conn
            .simple_query("SELECT * FROM items WHERE search = 'drill'")
            .await
            .unwrap(),
    );
    assert_eq!(found_by_owner[0].get("rent_count"), None);
}

#[tokio::test]
async fn comments_require_finished_rental_over_wire() {
    let (addr, _tm) = start_test_server().await;
    let (owner, booker, item_id) = seed(addr, "comments").await;

    let owner_conn = connect_as(addr, "comments", &owner.to_string()).await;
    let booker_conn = connect_as(addr, "comments", &booker.to_string()).await;

    // Commenting without having rented is refused
    let err = booker_conn
        .batch_execute(&format!(
            "INSERT INTO comments (id, item_id, text) VALUES ('{}', '{item_id}', 'never touched it')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("has not rented"), "got: {err}");

    // A finished, approved rental unlocks commenting
    let bid = Ulid::new();
    booker_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{bid}', '{item_id}', {}, {})"#,
            NOW - 2 * DAY,
            NOW - 2 * DAY + HOUR
        ))
        .await
        .unwrap();
    owner_conn
        .batch_execute(&format!("UPDATE bookings SET approved = true WHERE id = '{bid}'"))
        .await
        .unwrap();
    booker_conn
        .batch_execute(&format!(
            "INSERT INTO comments (id, item_id, text) VALUES ('{}', '{item_id}', 'great drill')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let comments = rows(
        booker_conn
            .simple_query(&format!("SELECT * FROM comments WHERE item_id = '{item_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].get("text"), Some("great drill"));
}

#[tokio::test]
async fn self_booking_is_invisible_over_wire() {
    let (addr, _tm) = start_test_server().await;
    let (owner, _booker, item_id) = seed(addr, "selfbook").await;

    let owner_conn = connect_as(addr, "selfbook", &owner.to_string()).await;
    let err = owner_conn
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, item_id, start, "end") VALUES ('{}', '{item_id}', {}, {})"#,
            Ulid::new(),
            NOW + HOUR,
            NOW + 2 * HOUR
        ))
        .await
        .unwrap_err();
    // The item is simply not bookable for its owner
    assert!(err.to_string().contains("not found"), "got: {err}");
}

#[tokio::test]
async fn tenants_do_not_share_state() {
    let (addr, _tm) = start_test_server().await;
    let (owner, _, item_id) = seed(addr, "tenant_a").await;

    // Same item id queried from another tenant does not exist
    let conn_b = connect_as(addr, "tenant_b", &owner.to_string()).await;
    conn_b
        .batch_execute(&format!(
            "INSERT INTO users (id, name, email) VALUES ('{owner}', 'Owner', 'owner@example.com')"
        ))
        .await
        .unwrap();
    let err = conn_b
        .simple_query(&format!("SELECT * FROM items WHERE id = '{item_id}'"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"), "got: {err}");
}
