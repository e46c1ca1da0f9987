//! Out-of-band alerting for abnormal readings
//!
//! The dispatcher listens on the event bus, looks up notification targets
//! from a directory on every abnormal event, and hands a formatted message to
//! the notifier for each target.

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod notifier;

pub use config::{format_alert_message, AlertChannel, NotificationTarget, TELEGRAM_API_BASE};
pub use directory::{DirectoryError, DirectoryUser, InMemoryDirectory, TargetDirectory};
pub use dispatcher::{AlertDispatcher, DispatchOutcome};
pub use notifier::{AlertSink, Notifier, NotifierError, DEFAULT_TIMEOUT};
