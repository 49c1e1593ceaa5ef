//! Message builder
//!
//! Fluent, side-effect-free construction of the FCM v1 `message` object.
//! The payload mode decides which of the `notification` and `data` blocks
//! reach the wire; platform overrides (`android`, `apns`) are emitted
//! whenever they are populated, regardless of mode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::errors::FcmError;

/// Which payload blocks a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageMode {
    #[default]
    NotificationAndData,
    DataOnly,
    NotificationOnly,
}

impl MessageMode {
    fn allows_notification(self) -> bool {
        !matches!(self, MessageMode::DataOnly)
    }

    fn allows_data(self) -> bool {
        !matches!(self, MessageMode::NotificationOnly)
    }
}

impl FromStr for MessageMode {
    type Err = FcmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notification_and_data" => Ok(MessageMode::NotificationAndData),
            "data_only" => Ok(MessageMode::DataOnly),
            "notification_only" => Ok(MessageMode::NotificationOnly),
            other => Err(FcmError::Configuration(format!("unknown message mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AndroidPriority {
    High,
    Normal,
    Low,
}

impl AndroidPriority {
    /// Delivery priority; the v1 API only knows HIGH and NORMAL
    fn delivery(self) -> &'static str {
        match self {
            AndroidPriority::High => "high",
            AndroidPriority::Normal | AndroidPriority::Low => "normal",
        }
    }

    fn notification_priority(self) -> &'static str {
        match self {
            AndroidPriority::High => "PRIORITY_HIGH",
            AndroidPriority::Normal => "PRIORITY_DEFAULT",
            AndroidPriority::Low => "PRIORITY_LOW",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AndroidOverrides {
    pub channel_id: Option<String>,
    pub priority: Option<AndroidPriority>,
    pub sound: Option<String>,
}

impl AndroidOverrides {
    fn is_empty(&self) -> bool {
        self.channel_id.is_none() && self.priority.is_none() && self.sound.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IosOverrides {
    pub badge: Option<u32>,
    pub sound: Option<String>,
}

impl IosOverrides {
    fn is_empty(&self) -> bool {
        self.badge.is_none() && self.sound.is_none()
    }
}

/// A push message, independent of its target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    title: Option<String>,
    body: Option<String>,
    image: Option<String>,
    data: BTreeMap<String, String>,
    android: AndroidOverrides,
    ios: IosOverrides,
    mode: MessageMode,
}

impl Message {
    /// Notification and data message
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_only() -> Self {
        Self::with_mode(MessageMode::DataOnly)
    }

    pub fn notification_only() -> Self {
        Self::with_mode(MessageMode::NotificationOnly)
    }

    pub fn with_mode(mode: MessageMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.image = Some(url.into());
        self
    }

    /// Add a data entry; the value is stored as text
    pub fn data(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.data.insert(key.into(), value.to_string());
        self
    }

    /// Merge arbitrary JSON values into the data block.
    ///
    /// Strings are kept verbatim, everything else is JSON-encoded.
    pub fn data_map<I, K>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        for (key, value) in entries {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            self.data.insert(key.into(), text);
        }
        self
    }

    pub fn android_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.android.channel_id = Some(channel_id.into());
        self
    }

    pub fn android_priority(mut self, priority: AndroidPriority) -> Self {
        self.android.priority = Some(priority);
        self
    }

    pub fn android_sound(mut self, sound: impl Into<String>) -> Self {
        self.android.sound = Some(sound.into());
        self
    }

    pub fn ios_badge(mut self, badge: u32) -> Self {
        self.ios.badge = Some(badge);
        self
    }

    pub fn ios_sound(mut self, sound: impl Into<String>) -> Self {
        self.ios.sound = Some(sound.into());
        self
    }

    /// Fluent form of [`Message::set_mode`]
    pub fn mode(mut self, mode: MessageMode) -> Self {
        self.set_mode(mode);
        self
    }

    /// Switch mode and drop the fields the new mode cannot carry.
    ///
    /// Cleared fields stay cleared if the mode is switched back later.
    pub fn set_mode(&mut self, mode: MessageMode) {
        self.mode = mode;
        if !mode.allows_notification() {
            self.title = None;
            self.body = None;
            self.image = None;
        }
        if !mode.allows_data() {
            self.data.clear();
        }
    }

    pub fn current_mode(&self) -> MessageMode {
        self.mode
    }

    pub fn data_entries(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    /// Serialize into the body of the v1 `message` object, without a target
    pub fn to_wire_format(&self) -> serde_json::Value {
        let notification = if self.mode.allows_notification() {
            WireNotification {
                title: self.title.as_deref(),
                body: self.body.as_deref(),
                image: self.image.as_deref(),
            }
        } else {
            WireNotification::default()
        };

        let data = if self.mode.allows_data() && !self.data.is_empty() {
            Some(&self.data)
        } else {
            None
        };

        let android = (!self.android.is_empty()).then(|| WireAndroid {
            priority: self.android.priority.map(AndroidPriority::delivery),
            notification: WireAndroidNotification {
                channel_id: self.android.channel_id.as_deref(),
                sound: self.android.sound.as_deref(),
                notification_priority: self
                    .android
                    .priority
                    .map(AndroidPriority::notification_priority),
            },
        });

        let apns = (!self.ios.is_empty()).then(|| WireApns {
            payload: WireApnsPayload {
                aps: WireAps {
                    badge: self.ios.badge,
                    sound: self.ios.sound.as_deref(),
                },
            },
        });

        let wire = WireMessage {
            notification: (!notification.is_empty()).then_some(notification),
            data,
            android,
            apns,
        };

        serde_json::to_value(wire).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Conversion from a host-level notification type into a [`Message`]
pub trait IntoMessage {
    fn into_message(self) -> Message;
}

impl IntoMessage for Message {
    fn into_message(self) -> Message {
        self
    }
}

impl IntoMessage for &Message {
    fn into_message(self) -> Message {
        self.clone()
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<WireNotification<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    android: Option<WireAndroid<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    apns: Option<WireApns<'a>>,
}

#[derive(Serialize, Default)]
struct WireNotification<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

impl WireNotification<'_> {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.image.is_none()
    }
}

#[derive(Serialize)]
struct WireAndroid<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<&'static str>,
    notification: WireAndroidNotification<'a>,
}

#[derive(Serialize)]
struct WireAndroidNotification<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_priority: Option<&'static str>,
}

#[derive(Serialize)]
struct WireApns<'a> {
    payload: WireApnsPayload<'a>,
}

#[derive(Serialize)]
struct WireApnsPayload<'a> {
    aps: WireAps<'a>,
}

#[derive(Serialize)]
struct WireAps<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
}
