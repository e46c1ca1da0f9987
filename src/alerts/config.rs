//! Alert channel configuration and message formatting

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Event, EventKind};

/// Default Telegram Bot API endpoint
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// How alerts leave the process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlertChannel {
    /// Log to tracing
    #[default]
    Log,
    /// HTTP webhook, one POST per target
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Telegram Bot API `sendMessage`, with the target's external id as chat id
    Telegram {
        token: String,
        #[serde(default = "default_telegram_base")]
        api_base: String,
    },
}

fn default_telegram_base() -> String {
    TELEGRAM_API_BASE.to_string()
}

impl AlertChannel {
    pub fn telegram(token: impl Into<String>) -> Self {
        AlertChannel::Telegram {
            token: token.into(),
            api_base: default_telegram_base(),
        }
    }

    pub fn webhook(url: impl Into<String>) -> Self {
        AlertChannel::Webhook {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// Pick a channel from what is configured: Telegram first, then the
    /// webhook, then logging.
    pub fn resolve(
        telegram_token: Option<String>,
        telegram_base: Option<String>,
        webhook_url: Option<String>,
    ) -> Self {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(telegram_token) {
            return AlertChannel::Telegram {
                token,
                api_base: non_empty(telegram_base).unwrap_or_else(default_telegram_base),
            };
        }
        if let Some(url) = non_empty(webhook_url) {
            return AlertChannel::webhook(url);
        }
        AlertChannel::Log
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertChannel::Log => "log",
            AlertChannel::Webhook { .. } => "webhook",
            AlertChannel::Telegram { .. } => "telegram",
        }
    }
}

/// An external identity that receives abnormal-status alerts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTarget {
    pub external_id: String,
}

impl NotificationTarget {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
        }
    }
}

/// Human-readable alert text for an event
pub fn format_alert_message(event: &Event) -> String {
    let (heading, label) = match event.kind {
        EventKind::Windowed => ("BPM Check Result:", "Average Value"),
        EventKind::Immediate => ("BPM Reading:", "Value"),
    };

    format!(
        "{}\n{}: {}\nStatus: {}\n🕒 Time: {}",
        heading,
        label,
        event.value,
        event.status,
        event.timestamp.to_rfc3339()
    )
}
