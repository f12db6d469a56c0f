//! Broker message shape for user events

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::features::{UserEvent, UNCATEGORIZED};

/// A user event as published on the `user_events` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(rename = "type", alias = "event_type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EventMessage {
    pub fn new(user_id: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            user_id: Some(user_id.into()),
            event_type: event_type.into(),
            data: match data {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    /// The target user and the event to apply, or `None` when the message is
    /// not addressed to a user or has an unrecognised type.
    pub fn to_user_event(&self) -> Option<(String, UserEvent)> {
        let user_id = self
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;

        let event = match self.event_type.as_str() {
            "pix_payment" | "payment" => UserEvent::Payment {
                amount: self.number("amount").unwrap_or(0.0),
                category: self
                    .text("category")
                    .unwrap_or_else(|| UNCATEGORIZED.to_string()),
            },
            "chargeback" => UserEvent::Chargeback,
            "refund" => UserEvent::Refund,
            "app_connection" => UserEvent::AppConnection,
            "login" => UserEvent::Login {
                device_id: self.text("device_id"),
                city: self.text("city"),
                region: self.text("region"),
            },
            _ => return None,
        };

        Some((user_id.to_string(), event))
    }

    fn number(&self, key: &str) -> Option<f64> {
        let value = match self.data.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payment_message() {
        let msg: EventMessage = serde_json::from_value(json!({
            "user_id": "u1",
            "type": "pix_payment",
            "data": {"amount": 150.5, "category": "groceries"}
        }))
        .unwrap();

        assert_eq!(
            msg.to_user_event(),
            Some((
                "u1".to_string(),
                UserEvent::Payment {
                    amount: 150.5,
                    category: "groceries".to_string()
                }
            ))
        );
    }

    #[test]
    fn test_payment_defaults() {
        let msg = EventMessage::new("u1", "payment", json!({}));
        assert_eq!(
            msg.to_user_event().unwrap().1,
            UserEvent::Payment {
                amount: 0.0,
                category: UNCATEGORIZED.to_string()
            }
        );

        let msg = EventMessage::new("u1", "payment", json!({"amount": "12.5"}));
        assert!(matches!(
            msg.to_user_event().unwrap().1,
            UserEvent::Payment { amount, .. } if amount == 12.5
        ));
    }

    #[test]
    fn test_event_type_alias_and_login_fields() {
        let msg: EventMessage = serde_json::from_value(json!({
            "user_id": "u1",
            "event_type": "login",
            "data": {"device_id": "d-1", "city": "Recife"}
        }))
        .unwrap();

        assert_eq!(
            msg.to_user_event().unwrap().1,
            UserEvent::Login {
                device_id: Some("d-1".to_string()),
                city: Some("Recife".to_string()),
                region: None,
            }
        );
    }

    #[test]
    fn test_unroutable_messages() {
        assert!(EventMessage::new("u1", "password_reset", json!({})).to_user_event().is_none());
        assert!(EventMessage::new("  ", "refund", json!({})).to_user_event().is_none());

        let anonymous: EventMessage =
            serde_json::from_value(json!({"type": "chargeback"})).unwrap();
        assert!(anonymous.to_user_event().is_none());
    }
}
