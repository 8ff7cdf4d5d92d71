//! Persistence layer — `Database` trait and backends.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, EmailFilter, EmailStatus, IntegrationLog, IntegrationStatus, Mailbox, NewEmail,
    StoredEmail,
};

#[cfg(test)]
pub mod test_support {
    //! Shared fixtures for store-backed tests.

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::error::DatabaseError;

    pub fn test_mailbox() -> Mailbox {
        Mailbox::new(
            "support-inbox",
            "imap.example.com",
            993,
            "orders@example.com",
            "hunter2",
        )
    }

    pub async fn insert_test_email(
        db: &dyn Database,
        mailbox_id: Uuid,
        natural_key: &str,
    ) -> Result<Uuid, DatabaseError> {
        db.insert_email(&NewEmail {
            mailbox_id,
            natural_key: natural_key.to_string(),
            subject: "New customer order".to_string(),
            sender: "customer@example.com".to_string(),
            received_at: Utc::now(),
            body_text: "Please install the new module by Friday.".to_string(),
        })
        .await
    }
}
