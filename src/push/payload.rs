//! Platform-neutral notification content and its FCM v1 wire framing.
//!
//! One [`NotificationPayload`] is built per event and reused for every
//! recipient. [`PayloadBuilder::build`] turns it into a [`WireMessage`] for a
//! single token or a topic. The message always carries a plain notification
//! block plus a data block that repeats the title and body, because some
//! Android delivery paths only hand the data block to a backgrounded app.
//!
//! Platform decorations live in a lookup table keyed by [`Channel`], so the
//! APNs, Android and Web framings stay independent of each other.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::PayloadConfig;
use crate::error::{Error, Result};
use crate::push::token::{self, Platform};

/// Default Android notification channel registered by the mobile client.
pub const DEFAULT_ANDROID_CHANNEL_ID: &str = "high_importance_channel";

/// Click action the client framework routes foreground taps through.
pub const DEFAULT_CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

/// Default web notification icon.
pub const DEFAULT_WEB_ICON: &str = "/icons/icon-192.png";

/// Default web notification badge.
pub const DEFAULT_WEB_BADGE: &str = "/icons/badge-72.png";

/// Default link opened when a web notification is clicked.
pub const DEFAULT_WEB_LINK: &str = "/";

const DEFAULT_SOUND: &str = "default";

/// Notification content shared by every recipient of one event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    /// String-keyed values for deep-linking and client-side routing.
    pub data: HashMap<String, String>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: HashMap::new(),
        }
    }

    /// Add a data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Reject content that must never reach a provider.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(Error::InvalidInput("body must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Where a wire message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A single device registration token.
    Token(String),
    /// Every device subscribed to the named topic.
    Topic(String),
}

/// Delivery channel with its own decoration rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Apns,
    Android,
    Web,
}

/// Channels decorated for a token of the given apparent platform.
///
/// Unknown tokens get every decoration; the provider only applies the block
/// matching the device it actually delivers to.
#[must_use]
pub fn channels_for(platform: Platform) -> &'static [Channel] {
    match platform {
        Platform::Ios => &[Channel::Apns],
        Platform::Android => &[Channel::Android, Channel::Web],
        Platform::Unknown => &[Channel::Apns, Channel::Android, Channel::Web],
    }
}

/// FCM v1 `messages:send` request body.
#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    pub message: WireMessage,
}

/// FCM v1 message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub notification: WireNotification,
    pub data: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<ApnsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<WebpushConfig>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireNotification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AndroidConfig {
    pub priority: String,
    pub notification: AndroidNotification,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AndroidNotification {
    pub channel_id: String,
    pub sound: String,
    pub default_sound: bool,
    pub default_vibrate_timings: bool,
    pub default_light_settings: bool,
    pub click_action: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApnsConfig {
    pub headers: HashMap<String, String>,
    pub payload: ApnsPayload,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApnsPayload {
    pub aps: Aps,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Aps {
    pub alert: ApsAlert,
    pub sound: String,
    pub badge: u32,
    #[serde(rename = "content-available")]
    pub content_available: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApsAlert {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebpushConfig {
    pub notification: WebNotification,
    pub fcm_options: WebFcmOptions,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebFcmOptions {
    pub link: String,
}

type Decorator = fn(&mut WireMessage, &NotificationPayload, &PayloadConfig);

/// Decoration table: one framing function per channel.
const DECORATORS: [(Channel, Decorator); 3] = [
    (Channel::Apns, decorate_apns),
    (Channel::Android, decorate_android),
    (Channel::Web, decorate_web),
];

fn decorate_apns(message: &mut WireMessage, content: &NotificationPayload, _: &PayloadConfig) {
    let mut headers = HashMap::new();
    headers.insert("apns-priority".to_string(), "10".to_string());
    headers.insert("apns-push-type".to_string(), "alert".to_string());

    message.apns = Some(ApnsConfig {
        headers,
        payload: ApnsPayload {
            aps: Aps {
                alert: ApsAlert {
                    title: content.title.clone(),
                    body: content.body.clone(),
                },
                sound: DEFAULT_SOUND.to_string(),
                badge: 1,
                content_available: 1,
            },
        },
    });
}

fn decorate_android(message: &mut WireMessage, _: &NotificationPayload, config: &PayloadConfig) {
    message.android = Some(AndroidConfig {
        priority: "high".to_string(),
        notification: AndroidNotification {
            channel_id: config.android_channel_id.clone(),
            sound: DEFAULT_SOUND.to_string(),
            default_sound: true,
            default_vibrate_timings: true,
            default_light_settings: true,
            click_action: config.click_action.clone(),
        },
    });
    // Same sound key as iOS, for clients that only read the data block.
    message
        .data
        .insert("sound".to_string(), DEFAULT_SOUND.to_string());
}

fn decorate_web(message: &mut WireMessage, content: &NotificationPayload, config: &PayloadConfig) {
    message.webpush = Some(WebpushConfig {
        notification: WebNotification {
            title: content.title.clone(),
            body: content.body.clone(),
            icon: config.web_icon.clone(),
            badge: config.web_badge.clone(),
        },
        fcm_options: WebFcmOptions {
            link: config.web_link.clone(),
        },
    });
}

/// Builds wire messages from shared content.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    config: PayloadConfig,
}

impl PayloadBuilder {
    pub fn new(config: PayloadConfig) -> Self {
        Self { config }
    }

    /// Frame `content` for one target. `content` is left untouched.
    #[must_use]
    pub fn build(&self, content: &NotificationPayload, target: &Target) -> WireMessage {
        let (token, topic, channels) = match target {
            Target::Token(t) => (
                Some(t.clone()),
                None,
                channels_for(token::classify(t)),
            ),
            Target::Topic(t) => (
                None,
                Some(t.clone()),
                channels_for(Platform::Unknown),
            ),
        };

        let mut data = content.data.clone();
        data.entry("title".to_string())
            .or_insert_with(|| content.title.clone());
        data.entry("body".to_string())
            .or_insert_with(|| content.body.clone());
        data.entry("click_action".to_string())
            .or_insert_with(|| self.config.click_action.clone());

        let mut message = WireMessage {
            token,
            topic,
            notification: WireNotification {
                title: content.title.clone(),
                body: content.body.clone(),
            },
            data,
            android: None,
            apns: None,
            webpush: None,
        };

        for (channel, decorate) in DECORATORS {
            if channels.contains(&channel) {
                decorate(&mut message, content, &self.config);
            }
        }

        message
    }

    /// Apply a single channel's decoration.
    #[cfg(test)]
    pub(crate) fn decorate(
        &self,
        channel: Channel,
        message: &mut WireMessage,
        content: &NotificationPayload,
    ) {
        if let Some((_, decorate)) = DECORATORS.iter().find(|(c, _)| *c == channel) {
            decorate(message, content, &self.config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PayloadBuilder {
        PayloadBuilder::new(PayloadConfig::default())
    }

    fn content() -> NotificationPayload {
        NotificationPayload::new("Friend Request", "Ana sent you a friend request")
            .with_data("type", "friend_request")
            .with_data("sender_id", "u-1")
    }

    fn bare_message() -> WireMessage {
        WireMessage {
            token: Some("t".to_string()),
            topic: None,
            notification: WireNotification {
                title: "t".to_string(),
                body: "b".to_string(),
            },
            data: HashMap::new(),
            android: None,
            apns: None,
            webpush: None,
        }
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(NotificationPayload::new("", "body").validate().is_err());
        assert!(NotificationPayload::new("title", "  ").validate().is_err());
        assert!(NotificationPayload::new("title", "body").validate().is_ok());
    }

    #[test]
    fn test_channels_for_platforms() {
        assert_eq!(channels_for(Platform::Ios), &[Channel::Apns]);
        assert_eq!(
            channels_for(Platform::Android),
            &[Channel::Android, Channel::Web]
        );
        assert_eq!(channels_for(Platform::Unknown).len(), 3);
    }

    #[test]
    fn test_apns_decoration_in_isolation() {
        let mut message = bare_message();
        builder().decorate(Channel::Apns, &mut message, &content());

        let apns = message.apns.expect("apns block");
        assert_eq!(apns.headers["apns-priority"], "10");
        assert_eq!(apns.headers["apns-push-type"], "alert");
        assert_eq!(apns.payload.aps.sound, "default");
        assert_eq!(apns.payload.aps.badge, 1);
        assert_eq!(apns.payload.aps.content_available, 1);
        assert!(message.android.is_none());
        assert!(message.webpush.is_none());
    }

    #[test]
    fn test_android_decoration_in_isolation() {
        let mut message = bare_message();
        builder().decorate(Channel::Android, &mut message, &content());

        let android = message.android.expect("android block");
        assert_eq!(android.priority, "high");
        assert_eq!(android.notification.channel_id, DEFAULT_ANDROID_CHANNEL_ID);
        assert_eq!(android.notification.click_action, DEFAULT_CLICK_ACTION);
        assert!(android.notification.default_sound);
        assert!(android.notification.default_vibrate_timings);
        assert!(android.notification.default_light_settings);
        assert_eq!(message.data["sound"], "default");
        assert!(message.apns.is_none());
    }

    #[test]
    fn test_web_decoration_in_isolation() {
        let mut message = bare_message();
        builder().decorate(Channel::Web, &mut message, &content());

        let web = message.webpush.expect("webpush block");
        assert_eq!(web.notification.icon, DEFAULT_WEB_ICON);
        assert_eq!(web.notification.badge, DEFAULT_WEB_BADGE);
        assert_eq!(web.fcm_options.link, DEFAULT_WEB_LINK);
    }

    #[test]
    fn test_build_for_legacy_ios_token() {
        let token = "ab".repeat(32);
        let message = builder().build(&content(), &Target::Token(token.clone()));

        assert_eq!(message.token.as_deref(), Some(token.as_str()));
        assert!(message.topic.is_none());
        assert!(message.apns.is_some());
        assert!(message.android.is_none());
        assert!(message.webpush.is_none());
    }

    #[test]
    fn test_build_for_android_token() {
        let token = "f".repeat(152);
        let message = builder().build(&content(), &Target::Token(token));

        assert!(message.android.is_some());
        assert!(message.webpush.is_some());
        assert!(message.apns.is_none());
        assert_eq!(message.data["sound"], "default");
    }

    #[test]
    fn test_build_for_unknown_token_gets_every_decoration() {
        let message = builder().build(&content(), &Target::Token("short".to_string()));
        assert!(message.android.is_some());
        assert!(message.apns.is_some());
        assert!(message.webpush.is_some());
    }

    #[test]
    fn test_build_for_topic() {
        let message = builder().build(&content(), &Target::Topic("announcements".to_string()));
        assert!(message.token.is_none());
        assert_eq!(message.topic.as_deref(), Some("announcements"));
        assert!(message.apns.is_some());
        assert!(message.android.is_some());
    }

    #[test]
    fn test_build_duplicates_content_into_data() {
        let original = content();
        let message = builder().build(&original, &Target::Token("short".to_string()));

        assert_eq!(message.notification.title, "Friend Request");
        assert_eq!(message.data["title"], "Friend Request");
        assert_eq!(message.data["body"], "Ana sent you a friend request");
        assert_eq!(message.data["type"], "friend_request");
        assert_eq!(message.data["click_action"], DEFAULT_CLICK_ACTION);
        // The shared content is not mutated.
        assert_eq!(original, content());
        assert!(!original.data.contains_key("sound"));
    }

    #[test]
    fn test_wire_request_serialization() {
        let message = builder().build(&content(), &Target::Token("short".to_string()));
        let json = serde_json::to_value(WireRequest { message }).unwrap();

        assert_eq!(json["message"]["token"], "short");
        assert!(json["message"].get("topic").is_none());
        assert_eq!(json["message"]["android"]["priority"], "high");
        assert_eq!(
            json["message"]["apns"]["payload"]["aps"]["content-available"],
            1
        );
        assert_eq!(json["message"]["apns"]["headers"]["apns-priority"], "10");
        assert_eq!(
            json["message"]["webpush"]["fcm_options"]["link"],
            DEFAULT_WEB_LINK
        );
    }
}
