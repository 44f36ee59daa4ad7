//! Notification events and their content templates.
//!
//! Events arrive from the trigger layer as JSON tagged by `kind`. Each kind
//! has one fixed template; only simple substitution happens here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::directory::ActivityDetails;
use crate::error::{Error, Result};
use crate::push::payload::NotificationPayload;

/// Longest direct-message preview, in characters, before `...` is appended.
pub const MESSAGE_PREVIEW_CHARS: usize = 100;

/// Creator name used when the directory has none.
const UNKNOWN_CREATOR: &str = "Someone";

/// A trigger for one dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum NotificationEvent {
    /// A chat message to one user.
    DirectMessage {
        sender_id: String,
        sender_name: String,
        receiver_id: String,
        message: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// A friend request to one user.
    FriendRequest {
        sender_id: String,
        sender_name: String,
        receiver_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Someone joined an activity; notifies its creator.
    ActivityJoin {
        activity_id: String,
        joiner_id: String,
        joiner_name: String,
    },
    /// A new activity; notifies users near it.
    ActivityNearby {
        activity_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        city: Option<String>,
        /// Overrides the configured radius.
        #[serde(default)]
        radius_km: Option<f64>,
    },
    /// Founder broadcast to every subscriber of a topic.
    TopicBroadcast {
        topic: String,
        #[serde(default)]
        title: Option<String>,
        message: String,
    },
    /// Admin-composed send to explicit tokens.
    Custom {
        tokens: Vec<String>,
        title: String,
        body: String,
        #[serde(default)]
        data: HashMap<String, String>,
    },
}

impl NotificationEvent {
    /// Metric/log label for the event kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DirectMessage { .. } => "direct_message",
            Self::FriendRequest { .. } => "friend_request",
            Self::ActivityJoin { .. } => "activity_join",
            Self::ActivityNearby { .. } => "activity_nearby",
            Self::TopicBroadcast { .. } => "topic_broadcast",
            Self::Custom { .. } => "custom",
        }
    }

    /// Reject events that can never be dispatched.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::DirectMessage {
                receiver_id,
                message,
                ..
            } => {
                require("receiverId", receiver_id)?;
                require("message", message)
            }
            Self::FriendRequest { receiver_id, .. } => require("receiverId", receiver_id),
            Self::ActivityJoin {
                activity_id,
                joiner_id,
                ..
            } => {
                require("activityId", activity_id)?;
                require("joinerId", joiner_id)
            }
            Self::ActivityNearby {
                activity_id,
                latitude,
                longitude,
                radius_km,
                ..
            } => {
                require("activityId", activity_id)?;
                if !latitude.is_finite() || !longitude.is_finite() {
                    return Err(Error::InvalidInput(
                        "latitude and longitude must be finite".to_string(),
                    ));
                }
                if let Some(r) = radius_km
                    && (r.is_nan() || *r <= 0.0)
                {
                    return Err(Error::InvalidInput(
                        "radiusKm must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Self::TopicBroadcast { topic, message, .. } => {
                require("topic", topic)?;
                require("message", message)
            }
            Self::Custom {
                tokens,
                title,
                body,
                ..
            } => {
                if tokens.is_empty() {
                    return Err(Error::InvalidInput("tokens must not be empty".to_string()));
                }
                require("title", title)?;
                require("body", body)
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Cut `text` to [`MESSAGE_PREVIEW_CHARS`] characters plus `...`.
#[must_use]
pub fn preview(text: &str) -> String {
    if text.chars().count() <= MESSAGE_PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MESSAGE_PREVIEW_CHARS).collect();
    format!("{head}...")
}

pub fn direct_message(
    sender_id: &str,
    sender_name: &str,
    message: &str,
    conversation_id: Option<&str>,
) -> NotificationPayload {
    let mut content = NotificationPayload::new(
        format!("New message from {sender_name}"),
        preview(message),
    )
    .with_data("type", "direct_message")
    .with_data("sender_id", sender_id);
    if let Some(id) = conversation_id {
        content = content.with_data("conversation_id", id);
    }
    content
}

pub fn friend_request(
    sender_id: &str,
    sender_name: &str,
    request_id: Option<&str>,
) -> NotificationPayload {
    let mut content = NotificationPayload::new(
        "Friend Request",
        format!("{sender_name} sent you a friend request"),
    )
    .with_data("type", "friend_request")
    .with_data("sender_id", sender_id);
    if let Some(id) = request_id {
        content = content.with_data("request_id", id);
    }
    content
}

pub fn activity_join(
    activity: &ActivityDetails,
    joiner_id: &str,
    joiner_name: &str,
) -> NotificationPayload {
    NotificationPayload::new(
        "Someone joined your activity!",
        format!("{joiner_name} joined \"{}\"", activity.title),
    )
    .with_data("type", "activity_join")
    .with_data("activity_id", activity.id.as_str())
    .with_data("joiner_id", joiner_id)
}

/// Nearby-activity content. `avg_distance_km` is the mean distance of the
/// recipients actually being notified.
pub fn activity_nearby(
    activity: &ActivityDetails,
    city: Option<&str>,
    avg_distance_km: f64,
    recipient_count: usize,
) -> NotificationPayload {
    let avg = format!("{avg_distance_km:.1}");
    let city = city
        .filter(|c| !c.trim().is_empty())
        .or_else(|| activity.city.as_deref().filter(|c| !c.trim().is_empty()));

    let body = match city {
        Some(city) => format!("\"{}\" in {city}", activity.title),
        None => {
            let creator = activity
                .creator_display_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(UNKNOWN_CREATOR);
            format!("\"{creator} wants to {}\" ({avg}km away)", activity.title)
        }
    };

    let mut content = NotificationPayload::new("New activity nearby!", body)
        .with_data("type", "activity_nearby")
        .with_data("activity_id", activity.id.as_str())
        .with_data("avg_distance_km", avg)
        .with_data("recipient_count", recipient_count.to_string());
    if let Some(time) = &activity.meeting_time {
        content = content.with_data("meeting_time", time.as_str());
    }
    content
}

pub fn topic_broadcast(
    topic: &str,
    title: Option<&str>,
    message: &str,
    app_name: &str,
) -> NotificationPayload {
    let title = title
        .filter(|t| !t.trim().is_empty())
        .map_or_else(|| format!("Message from {app_name}"), str::to_string);

    NotificationPayload::new(title, message)
        .with_data("type", "broadcast")
        .with_data("topic", topic)
}

pub fn custom(title: &str, body: &str, data: &HashMap<String, String>) -> NotificationPayload {
    let mut content = NotificationPayload::new(title, body);
    content.data = data.clone();
    content
        .data
        .entry("type".to_string())
        .or_insert_with(|| "custom".to_string());
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(city: Option<&str>) -> ActivityDetails {
        ActivityDetails {
            id: "act-1".to_string(),
            title: "go bouldering".to_string(),
            description: None,
            meeting_time: Some("2026-06-01T18:00:00Z".to_string()),
            created_by: "creator".to_string(),
            creator_display_name: Some("Dana".to_string()),
            city: city.map(str::to_string),
        }
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{
            "kind": "activity_nearby",
            "activityId": "act-1",
            "latitude": 40.7128,
            "longitude": -74.0060
        }"#;
        let event: NotificationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), "activity_nearby");
        assert!(matches!(
            event,
            NotificationEvent::ActivityNearby { city: None, radius_km: None, .. }
        ));

        let json = r#"{"kind":"friend_request","senderId":"a","senderName":"Ann","receiverId":"b"}"#;
        let event: NotificationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), "friend_request");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let json = r#"{"kind":"carrier_pigeon","to":"b"}"#;
        assert!(serde_json::from_str::<NotificationEvent>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let event = NotificationEvent::TopicBroadcast {
            topic: " ".to_string(),
            title: None,
            message: "hello".to_string(),
        };
        assert!(matches!(event.validate(), Err(Error::InvalidInput(_))));

        let event = NotificationEvent::Custom {
            tokens: vec![],
            title: "t".to_string(),
            body: "b".to_string(),
            data: HashMap::new(),
        };
        assert!(matches!(event.validate(), Err(Error::InvalidInput(_))));

        let event = NotificationEvent::ActivityNearby {
            activity_id: "act-1".to_string(),
            latitude: f64::NAN,
            longitude: 0.0,
            city: None,
            radius_km: None,
        };
        assert!(matches!(event.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_preview_truncates_long_messages() {
        let long = "a".repeat(140);
        let body = preview(&long);
        assert_eq!(body, format!("{}...", "a".repeat(100)));

        let exact = "b".repeat(100);
        assert_eq!(preview(&exact), exact);
    }

    #[test]
    fn test_preview_counts_characters() {
        let long = "é".repeat(120);
        let body = preview(&long);
        assert_eq!(body.chars().count(), 103);
    }

    #[test]
    fn test_direct_message_template() {
        let content = direct_message("u1", "Ann", "hi there", Some("c9"));
        assert_eq!(content.title, "New message from Ann");
        assert_eq!(content.body, "hi there");
        assert_eq!(content.data["conversation_id"], "c9");
    }

    #[test]
    fn test_friend_request_template() {
        let content = friend_request("u1", "Ann", None);
        assert_eq!(content.title, "Friend Request");
        assert_eq!(content.body, "Ann sent you a friend request");
        assert!(!content.data.contains_key("request_id"));
    }

    #[test]
    fn test_activity_join_template() {
        let content = activity_join(&activity(None), "u2", "Ben");
        assert_eq!(content.title, "Someone joined your activity!");
        assert_eq!(content.body, "Ben joined \"go bouldering\"");
        assert_eq!(content.data["activity_id"], "act-1");
    }

    #[test]
    fn test_activity_nearby_with_city() {
        let content = activity_nearby(&activity(Some("Boulder")), None, 5.2, 3);
        assert_eq!(content.title, "New activity nearby!");
        assert_eq!(content.body, "\"go bouldering\" in Boulder");
        assert_eq!(content.data["avg_distance_km"], "5.2");
        assert_eq!(content.data["recipient_count"], "3");
    }

    #[test]
    fn test_activity_nearby_fallback_body() {
        let content = activity_nearby(&activity(None), Some(""), 5.2, 3);
        assert_eq!(content.body, "\"Dana wants to go bouldering\" (5.2km away)");
    }

    #[test]
    fn test_activity_nearby_blank_event_city_uses_stored_city() {
        let content = activity_nearby(&activity(Some("Boulder")), Some("  "), 5.2, 3);
        assert_eq!(content.body, "\"go bouldering\" in Boulder");

        let content = activity_nearby(&activity(Some("Boulder")), Some("Denver"), 5.2, 3);
        assert_eq!(content.body, "\"go bouldering\" in Denver");
    }

    #[test]
    fn test_topic_broadcast_default_title() {
        let content = topic_broadcast("all_users", None, "Big news", "Meetup");
        assert_eq!(content.title, "Message from Meetup");
        assert_eq!(content.body, "Big news");

        let content = topic_broadcast("all_users", Some("Hello"), "Big news", "Meetup");
        assert_eq!(content.title, "Hello");
    }

    #[test]
    fn test_custom_keeps_caller_data() {
        let mut data = HashMap::new();
        data.insert("screen".to_string(), "promo".to_string());
        let content = custom("Title", "Body", &data);
        assert_eq!(content.data["screen"], "promo");
        assert_eq!(content.data["type"], "custom");
    }
}
