//! Line formatting for geyser-tail (text or JSON lines)

use clap::ValueEnum;
use geyser_client::ClientEvent;
use serde_json::json;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `<time> <subscription> <method> <payload>` (default)
    #[default]
    Text,
    /// One JSON object per update
    Json,
}

/// Render a stream update; `None` for every other event
pub fn render(event: &ClientEvent, format: OutputFormat) -> Option<String> {
    let ClientEvent::Data {
        subscription_id,
        update,
        received_at,
    } = event
    else {
        return None;
    };

    let method = update
        .method()
        .map(|m| m.as_str())
        .unwrap_or("unknown");
    let payload = serde_json::to_value(&update.update)
        .ok()
        .and_then(|value| value.as_object().and_then(|o| o.values().next().cloned()))
        .unwrap_or(serde_json::Value::Null);

    Some(match format {
        OutputFormat::Text => format!(
            "{} {} {} {}",
            received_at.format("%H:%M:%S%.3f"),
            subscription_id,
            method,
            payload
        ),
        OutputFormat::Json => json!({
            "receivedAt": received_at.to_rfc3339(),
            "subscription": subscription_id,
            "method": method,
            "filters": update.filters,
            "payload": payload,
        })
        .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use geyser_core::{SubscribeUpdate, UpdateOneof};
    use std::sync::Arc;

    fn slot_event() -> ClientEvent {
        ClientEvent::Data {
            subscription_id: "tip".into(),
            update: Arc::new(SubscribeUpdate::new(
                vec!["tip".into()],
                UpdateOneof::Slot(json!({"slot": 7})),
            )),
            received_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap(),
        }
    }

    #[test]
    fn test_render_text() {
        let line = render(&slot_event(), OutputFormat::Text).unwrap();
        assert_eq!(line, r#"12:30:15.000 tip slots {"slot":7}"#);
    }

    #[test]
    fn test_render_json() {
        let line = render(&slot_event(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["subscription"], "tip");
        assert_eq!(value["method"], "slots");
        assert_eq!(value["payload"], json!({"slot": 7}));
        assert_eq!(value["filters"], json!(["tip"]));
    }

    #[test]
    fn test_non_data_events_are_skipped() {
        assert!(render(&ClientEvent::Connected, OutputFormat::Text).is_none());
    }
}
