//! Database connection and initialization.

pub use drover_core::db::DatabaseError;

drover_core::define_database!(Database, "Supervisor database migrations complete");

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().await;
        assert!(db.is_ok());
    }

    #[tokio::test]
    async fn open_on_disk_runs_migrations() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("drover.db")).await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(names.contains(&"agents"));
        assert!(names.contains(&"log_entries"));
        assert!(names.contains(&"messages"));
    }
}
