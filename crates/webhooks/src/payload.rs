//! Per-subscriber payload shaping and the optional test signature.

use std::time::Duration;

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

/// Automation platforms choke on nested payloads and slow handlers; they get
/// the flat shape and a shorter timeout.
pub const AUTOMATION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known automation-platform markers, matched case-insensitively.
const AUTOMATION_MARKERS: &[&str] = &["n8n", "nodemation"];

#[must_use]
pub fn is_automation_platform(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    AUTOMATION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Request timeout for a target URL.
#[must_use]
pub fn timeout_for(url: &str) -> Duration {
    if is_automation_platform(url) {
        AUTOMATION_TIMEOUT
    } else {
        DEFAULT_TIMEOUT
    }
}

/// Shape the event for its subscriber.
///
/// Regular subscribers receive the canonical event verbatim. Automation
/// platforms get it fully flat: nested `interactive_reply` fields are
/// hoisted to prefixed top-level keys and null members are dropped.
#[must_use]
pub fn adapt_payload(url: &str, event: &serde_json::Value) -> serde_json::Value {
    if !is_automation_platform(url) {
        return event.clone();
    }

    let Some(object) = event.as_object() else {
        return event.clone();
    };

    let mut flat = serde_json::Map::new();
    for (key, value) in object {
        if value.is_null() {
            continue;
        }
        if key == "interactive_reply"
            && let Some(reply) = value.as_object()
        {
            for (inner_key, inner_value) in reply {
                if !inner_value.is_null() {
                    flat.insert(format!("interactive_{inner_key}"), inner_value.clone());
                }
            }
            continue;
        }
        flat.insert(key.clone(), value.clone());
    }
    serde_json::Value::Object(flat)
}

/// `HMAC-SHA256(secret, body)` as lowercase hex, sent in
/// `X-Webhook-Signature` on explicit test deliveries.
#[must_use]
pub fn signature(secret: &str, body: &[u8]) -> String {
    // HMAC accepts any key length; the error arm is unreachable.
    let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automation_markers_match_case_insensitively() {
        assert!(is_automation_platform("https://my.N8N.cloud/webhook/abc"));
        assert!(is_automation_platform("https://nodemation.example.com/hook"));
        assert!(!is_automation_platform("https://example.com/webhooks/n-8-n"));
    }

    #[test]
    fn timeouts_differ_by_platform() {
        assert_eq!(timeout_for("https://x.n8n.io/h"), AUTOMATION_TIMEOUT);
        assert_eq!(timeout_for("https://example.com/h"), DEFAULT_TIMEOUT);
    }

    #[test]
    fn regular_subscribers_get_the_event_verbatim() {
        let event = serde_json::json!({
            "event": "message",
            "message": "hi",
            "interactive_reply": null,
        });
        assert_eq!(adapt_payload("https://example.com/h", &event), event);
    }

    #[test]
    fn automation_payload_is_flat_and_null_free() {
        let event = serde_json::json!({
            "event": "message",
            "message": "pick one",
            "interactive_reply": {
                "type": "list_reply",
                "id": "row-3",
                "title": "Thursday",
                "params": null,
            },
        });

        let flat = adapt_payload("https://flows.n8n.example/h", &event);
        assert_eq!(flat["interactive_type"], "list_reply");
        assert_eq!(flat["interactive_id"], "row-3");
        assert_eq!(flat["interactive_title"], "Thursday");
        assert!(flat.get("interactive_reply").is_none());
        assert!(flat.get("interactive_params").is_none());
        assert_eq!(flat["message"], "pick one");
    }

    #[test]
    fn signature_is_stable_hex() {
        let sig = signature("topsecret", b"{\"event\":\"message\"}");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, signature("topsecret", b"{\"event\":\"message\"}"));
        assert_ne!(sig, signature("othersecret", b"{\"event\":\"message\"}"));
    }
}
