//! RFC822 parsing for ingested items — headers, body selection, natural key.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use uuid::Uuid;

use crate::error::IngestError;

/// Header and body fields extracted from one raw item.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    /// Message-ID header, or a synthesized deterministic key.
    pub natural_key: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
}

/// Parse a raw RFC822 item.
///
/// - decoded (RFC 2047) subject and sender headers;
/// - plain-text body preferred, HTML stripped as fallback, then the first
///   text-typed part;
/// - Date header normalized to UTC, defaulting to `ingested_at` when
///   missing or unparseable;
/// - natural key from Message-ID, else synthesized as `host/mailbox/uid`
///   so it is deterministic and never null.
pub fn parse_email(
    raw: &[u8],
    uid: u32,
    mailbox_id: Uuid,
    host: &str,
    ingested_at: DateTime<Utc>,
) -> Result<ParsedEmail, IngestError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| IngestError::MalformedItem {
            uid,
            reason: "unparseable RFC822 payload".to_string(),
        })?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let natural_key = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{host}/{mailbox_id}/{uid}"));

    let received_at = parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(
                        u32::from(d.hour),
                        u32::from(d.minute),
                        u32::from(d.second),
                    )
                })
        })
        .map(|naive| naive.and_utc())
        .unwrap_or(ingested_at);

    let body_text = extract_text(&parsed);

    Ok(ParsedEmail {
        natural_key,
        subject,
        sender,
        received_at,
        body_text,
    })
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    "(no readable content)".to_string()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str, uid: u32) -> ParsedEmail {
        parse_email(
            raw.as_bytes(),
            uid,
            Uuid::nil(),
            "imap.example.com",
            Utc::now(),
        )
        .expect("parseable")
    }

    #[test]
    fn plain_email_round_trip() {
        let raw = "Message-ID: <order-1@example.com>\r\n\
                   From: Alice <alice@example.com>\r\n\
                   Subject: New service order\r\n\
                   Date: Tue, 01 Jul 2025 10:30:00 +0000\r\n\
                   Content-Type: text/plain\r\n\
                   \r\n\
                   Please install the module.\r\n";
        let parsed = parse(raw, 101);

        assert_eq!(parsed.natural_key, "order-1@example.com");
        assert_eq!(parsed.sender, "alice@example.com");
        assert_eq!(parsed.subject, "New service order");
        assert!(parsed.body_text.contains("install the module"));
        assert_eq!(
            parsed.received_at,
            chrono::NaiveDate::from_ymd_opt(2025, 7, 1)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap()
                .and_utc()
        );
    }

    #[test]
    fn missing_message_id_synthesizes_deterministic_key() {
        let raw = "From: bob@example.com\r\nSubject: hi\r\n\r\nbody";
        let first = parse(raw, 7);
        let second = parse(raw, 7);
        assert_eq!(first.natural_key, "imap.example.com/00000000-0000-0000-0000-000000000000/7");
        assert_eq!(first.natural_key, second.natural_key);

        // A different uid yields a different key.
        let other = parse(raw, 8);
        assert_ne!(first.natural_key, other.natural_key);
    }

    #[test]
    fn unparseable_date_defaults_to_ingestion_time() {
        let raw = "Message-ID: <x@y>\r\nFrom: a@b.com\r\nSubject: s\r\n\r\nbody";
        let before = Utc::now();
        let parsed = parse_email(raw.as_bytes(), 1, Uuid::nil(), "h", before).unwrap();
        assert_eq!(parsed.received_at, before);
    }

    #[test]
    fn encoded_subject_is_decoded() {
        let raw = "Message-ID: <e@y>\r\n\
                   From: a@b.com\r\n\
                   Subject: =?UTF-8?B?T3LDp2FtZW50byB1cmdlbnRl?=\r\n\
                   \r\n\
                   body";
        let parsed = parse(raw, 1);
        assert_eq!(parsed.subject, "Orçamento urgente");
    }

    #[test]
    fn html_only_body_is_stripped() {
        let raw = "Message-ID: <h@y>\r\n\
                   From: a@b.com\r\n\
                   Subject: html\r\n\
                   Content-Type: text/html\r\n\
                   \r\n\
                   <html><body><p>Order <b>now</b></p></body></html>";
        let parsed = parse(raw, 1);
        assert_eq!(parsed.body_text, "Order now");
    }

    #[test]
    fn missing_headers_get_placeholders() {
        let raw = "X-Queue: ingest\r\n\r\njust a body";
        let parsed = parse(raw, 1);
        assert_eq!(parsed.sender, "unknown");
        assert_eq!(parsed.subject, "(no subject)");
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<div><b>a</b> <i>b</i></div>"), "a b");
        assert_eq!(strip_html("no tags"), "no tags");
        assert_eq!(strip_html(""), "");
    }
}
