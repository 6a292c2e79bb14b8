use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last compaction. Only the log shrinks — the
/// in-memory state is never touched.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("lendit_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compaction_preserves_decided_bookings() {
        let path = test_wal_path("preserve_decided.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path.clone(), notify).unwrap());

        let owner = Ulid::new();
        let booker = Ulid::new();
        engine
            .create_user(owner, "Owner".into(), "owner@example.com".into())
            .await
            .unwrap();
        engine
            .create_user(booker, "Booker".into(), "booker@example.com".into())
            .await
            .unwrap();
        let item_id = Ulid::new();
        engine
            .create_item(item_id, owner, "Bike".into(), "city bike".into(), true)
            .await
            .unwrap();
        let booking_id = Ulid::new();
        engine
            .request_booking(booking_id, item_id, booker, 1000, 2000)
            .await
            .unwrap();
        engine.decide_booking(booking_id, owner, true).await.unwrap();

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Rebuild from the compacted log: the approval must survive.
        let notify = Arc::new(NotifyHub::new());
        let reopened = Engine::new(path, notify).unwrap();
        let fetched = reopened.get_booking(booking_id, owner).await.unwrap();
        assert_eq!(fetched.status, crate::model::Status::Approved);
    }
}
