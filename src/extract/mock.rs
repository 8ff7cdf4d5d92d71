//! Deterministic mock extraction, used when no provider credential is
//! configured (tests, CI). The output is schema-aware and round-trips
//! through the same validation as real provider output.

use crate::extract::schema::SchemaKind;

/// Produce a fixed, valid document for the given schema.
pub fn mock_document(kind: &SchemaKind) -> serde_json::Value {
    match kind {
        SchemaKind::ServiceOrder => serde_json::json!({
            "document_type": "SERVICE_ORDER",
            "confidence_score": 95,
            "customer_name": "Mock Customer Ltda",
            "service_description": "Implementation of the requested module.",
            "priority": "HIGH",
            "target_sla_days": 7,
            "delivery_date": null,
            "contact_phone": "9999-8888"
        }),
        SchemaKind::SupportRequest => serde_json::json!({
            "document_type": "SUPPORT_REQUEST",
            "confidence_score": 90,
            "system_affected": "Email system",
            "issue_summary": "Data extraction issue",
            "is_critical": false,
            "error_code": "ERR_001",
            "requester_email": "mock@example.com"
        }),
    }
}
