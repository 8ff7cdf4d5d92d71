//! Liveness probe against the persistence layer.

use std::sync::Arc;

use serde::Serialize;

use crate::store::Database;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub db_status: String,
    pub version: &'static str,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Run a trivial query against the store and report the result.
pub async fn check(db: &Arc<dyn Database>) -> HealthReport {
    match db.probe().await {
        Ok(()) => HealthReport {
            status: "ok",
            db_status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION"),
        },
        Err(e) => HealthReport {
            status: "error",
            db_status: format!("error: {e}"),
            version: env!("CARGO_PKG_VERSION"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn healthy_store_reports_ok() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let report = check(&db).await;
        assert!(report.is_ok());
        assert_eq!(report.db_status, "ok");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }
}
