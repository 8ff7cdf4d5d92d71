//! Extraction schemas — the closed document-type set and its validation.
//!
//! Each schema declares the structure requested from the AI provider
//! (generated with `schemars`) and validates raw provider output against it.
//! Validation collects *all* field violations instead of stopping at the
//! first, so the retry loop can feed a complete correction directive back
//! to the provider.

use chrono::NaiveDate;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

/// Closed enumeration of document types the extractor recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DocumentType {
    #[serde(rename = "SERVICE_ORDER")]
    ServiceOrder,
    #[serde(rename = "SUPPORT_REQUEST")]
    SupportRequest,
    #[serde(rename = "REPORT")]
    Report,
    #[serde(rename = "OTHER")]
    Other,
}

/// Suggested handling priority for a service order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Priority {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
}

/// Extracted fields for a service order email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceOrder {
    /// Must be `SERVICE_ORDER`.
    pub document_type: DocumentType,
    /// Extraction confidence, 0–100.
    #[schemars(range(min = 0, max = 100))]
    pub confidence_score: i64,
    /// Full name or company name of the customer.
    pub customer_name: String,
    /// Description of the requested service.
    pub service_description: String,
    /// Suggested handling priority.
    pub priority: Priority,
    /// Suggested delivery SLA in business days, 1–90.
    #[schemars(range(min = 1, max = 90))]
    pub target_sla_days: i64,
    /// Hard delivery date, when the email states one.
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    /// Preferred contact phone number.
    pub contact_phone: String,
}

/// Extracted fields for a support/bug request email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SupportRequest {
    /// Must be `SUPPORT_REQUEST`.
    pub document_type: DocumentType,
    /// Extraction confidence, 0–100.
    #[schemars(range(min = 0, max = 100))]
    pub confidence_score: i64,
    /// Affected system or module name.
    pub system_affected: String,
    /// Concise summary of the problem.
    pub issue_summary: String,
    /// True when the problem blocks normal operation.
    pub is_critical: bool,
    /// Error code mentioned in the email, if any.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Email address of the requester, for follow-up.
    pub requester_email: String,
}

/// Which schema the gateway asks the provider to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    ServiceOrder,
    SupportRequest,
}

impl SchemaKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServiceOrder => "ServiceOrder",
            Self::SupportRequest => "SupportRequest",
        }
    }

    /// The document_type literal this schema requires.
    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::ServiceOrder => DocumentType::ServiceOrder,
            Self::SupportRequest => DocumentType::SupportRequest,
        }
    }

    /// JSON Schema sent to the provider, generated from the same types that
    /// validate the response.
    pub fn json_schema(&self) -> serde_json::Value {
        let schema = match self {
            Self::ServiceOrder => schema_for!(ServiceOrder),
            Self::SupportRequest => schema_for!(SupportRequest),
        };
        serde_json::to_value(schema).unwrap_or_default()
    }

    /// Validate raw provider output against this schema.
    ///
    /// Returns the typed document, or every field violation found.
    pub fn validate(&self, raw: &str) -> Result<ExtractedDocument, Vec<FieldViolation>> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            vec![FieldViolation {
                field: "$".to_string(),
                message: format!("output is not valid JSON: {e}"),
            }]
        })?;

        let mut violations = validate_common(&value, self.document_type());
        match self {
            Self::ServiceOrder => validate_service_order(&value, &mut violations),
            Self::SupportRequest => validate_support_request(&value, &mut violations),
        }
        if !violations.is_empty() {
            return Err(violations);
        }

        // Bounds are already checked; deserialization can only fail on shape
        // drift, which is reported as a root violation.
        let doc = match self {
            Self::ServiceOrder => serde_json::from_value::<ServiceOrder>(value)
                .map(ExtractedDocument::ServiceOrder),
            Self::SupportRequest => serde_json::from_value::<SupportRequest>(value)
                .map(ExtractedDocument::SupportRequest),
        };
        doc.map_err(|e| {
            vec![FieldViolation {
                field: "$".to_string(),
                message: format!("schema mismatch: {e}"),
            }]
        })
    }
}

/// A validated extraction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedDocument {
    ServiceOrder(ServiceOrder),
    SupportRequest(SupportRequest),
}

impl ExtractedDocument {
    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::ServiceOrder(d) => d.document_type,
            Self::SupportRequest(d) => d.document_type,
        }
    }

    pub fn confidence_score(&self) -> i64 {
        match self {
            Self::ServiceOrder(d) => d.confidence_score,
            Self::SupportRequest(d) => d.confidence_score,
        }
    }

    /// JSON payload persisted on the email row.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// One-line summary for the downstream notification.
    pub fn summary(&self) -> String {
        match self {
            Self::ServiceOrder(d) => format!(
                "Service order from {} (priority {:?}, SLA {} days)",
                d.customer_name, d.priority, d.target_sla_days
            ),
            Self::SupportRequest(d) => format!(
                "Support request for {}{}: {}",
                d.system_affected,
                if d.is_critical { " [critical]" } else { "" },
                d.issue_summary
            ),
        }
    }
}

/// One failing field and its violation, fed back to the provider on retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field '{}': {}", self.field, self.message)
    }
}

// ── Field checks ────────────────────────────────────────────────────

fn push(violations: &mut Vec<FieldViolation>, field: &str, message: impl Into<String>) {
    violations.push(FieldViolation {
        field: field.to_string(),
        message: message.into(),
    });
}

fn require_str(
    value: &serde_json::Value,
    field: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match value.get(field) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(serde_json::Value::String(_)) => {
            push(violations, field, "must not be empty");
            None
        }
        Some(_) => {
            push(violations, field, "must be a string");
            None
        }
        None => {
            push(violations, field, "is required");
            None
        }
    }
}

fn require_int_in(
    value: &serde_json::Value,
    field: &str,
    min: i64,
    max: i64,
    violations: &mut Vec<FieldViolation>,
) {
    match value.get(field).and_then(serde_json::Value::as_i64) {
        Some(n) if (min..=max).contains(&n) => {}
        Some(n) => push(
            violations,
            field,
            format!("must be between {min} and {max}, got {n}"),
        ),
        None => push(violations, field, format!("must be an integer in [{min}, {max}]")),
    }
}

fn validate_common(value: &serde_json::Value, expected: DocumentType) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    let expected_tag = serde_json::to_value(expected).unwrap_or_default();
    match value.get("document_type") {
        Some(tag) if *tag == expected_tag => {}
        Some(tag) => push(
            &mut violations,
            "document_type",
            format!("must be {expected_tag}, got {tag}"),
        ),
        None => push(&mut violations, "document_type", "is required"),
    }

    require_int_in(value, "confidence_score", 0, 100, &mut violations);
    violations
}

fn validate_service_order(value: &serde_json::Value, violations: &mut Vec<FieldViolation>) {
    require_str(value, "customer_name", violations);
    require_str(value, "service_description", violations);
    require_str(value, "contact_phone", violations);
    require_int_in(value, "target_sla_days", 1, 90, violations);

    match value.get("priority") {
        Some(serde_json::Value::String(s)) if matches!(s.as_str(), "HIGH" | "MEDIUM" | "LOW") => {}
        Some(other) => push(
            violations,
            "priority",
            format!("must be one of HIGH, MEDIUM, LOW, got {other}"),
        ),
        None => push(violations, "priority", "is required"),
    }

    match value.get("delivery_date") {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::String(s)) => {
            if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
                push(violations, "delivery_date", "must be an ISO date (YYYY-MM-DD)");
            }
        }
        Some(_) => push(violations, "delivery_date", "must be a date string or null"),
    }
}

fn validate_support_request(value: &serde_json::Value, violations: &mut Vec<FieldViolation>) {
    require_str(value, "system_affected", violations);
    require_str(value, "issue_summary", violations);

    if let Some(email) = require_str(value, "requester_email", violations)
        && !email.contains('@')
    {
        push(violations, "requester_email", "must be an email address");
    }

    match value.get("is_critical") {
        Some(serde_json::Value::Bool(_)) => {}
        Some(_) => push(violations, "is_critical", "must be a boolean"),
        None => push(violations, "is_critical", "is required"),
    }

    match value.get("error_code") {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::String(_)) => {}
        Some(_) => push(violations, "error_code", "must be a string or null"),
    }
}
