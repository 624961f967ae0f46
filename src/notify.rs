//! Chat notifications.
//!
//! Delivery is best effort. A failed post is logged and forgotten: no retry,
//! no escalation, and never an error for the caller.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

const AUTHOR_NAME: &str = "builder";
const FOOTER_ICON: &str = "https://platform.slack-edge.com/img/default_application_icon.png";
const POST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Good,
    Warning,
    Danger,
    Comment,
}

impl Severity {
    pub fn color(self) -> &'static str {
        match self {
            Severity::Good => "#36a64f",
            Severity::Warning => "#E7FF1A",
            Severity::Danger => "#FF3838",
            Severity::Comment => "#CDCDCD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "High",
            Priority::Normal => "Normal",
            Priority::Low => "Low",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub severity: Severity,
    pub priority: Priority,
    pub title: String,
    pub title_link: Option<String>,
}

pub trait Notifier {
    fn send(&self, notification: &Notification);
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    text: &'a str,
    channel: &'a str,
    attachments: [Attachment<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    color: &'a str,
    author_name: &'a str,
    title: &'a str,
    title_link: &'a str,
    fields: [Field; 1],
    footer: &'a str,
    footer_icon: &'a str,
}

#[derive(Debug, Serialize)]
struct Field {
    title: &'static str,
    value: String,
    short: bool,
}

/// Incoming-webhook notifier.
///
/// Without a webhook URL the message is only logged.
#[derive(Debug, Clone)]
pub struct SlackWebhook {
    url: Option<String>,
    channel: String,
    footer: String,
}

impl SlackWebhook {
    pub fn new(url: Option<String>, channel: impl Into<String>, footer: impl Into<String>) -> Self {
        Self {
            url,
            channel: channel.into(),
            footer: footer.into(),
        }
    }

    pub fn payload(&self, notification: &Notification) -> serde_json::Value {
        let payload = Payload {
            text: &notification.text,
            channel: &self.channel,
            attachments: [Attachment {
                color: notification.severity.color(),
                author_name: AUTHOR_NAME,
                title: &notification.title,
                title_link: notification.title_link.as_deref().unwrap_or(""),
                fields: [Field {
                    title: "Priority",
                    value: notification.priority.to_string(),
                    short: false,
                }],
                footer: &self.footer,
                footer_icon: FOOTER_ICON,
            }],
        };
        serde_json::to_value(payload).unwrap_or_default()
    }

    fn post(&self, url: &str, body: &serde_json::Value) -> reqwest::Result<()> {
        reqwest::blocking::Client::builder()
            .timeout(POST_TIMEOUT)
            .build()?
            .post(url)
            .json(body)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

impl Notifier for SlackWebhook {
    fn send(&self, notification: &Notification) {
        let Some(url) = self.url.as_deref() else {
            tracing::info!(
                channel = %self.channel,
                severity = ?notification.severity,
                "no webhook configured; notification: {}",
                notification.text
            );
            return;
        };

        if let Err(err) = self.post(url, &self.payload(notification)) {
            tracing::warn!(
                channel = %self.channel,
                error = %err,
                "could not send the message to the channel"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn danger() -> Notification {
        Notification {
            text: "Build failed in stage `build-iso` for branch `master`".to_string(),
            severity: Severity::Danger,
            priority: Priority::High,
            title: "Check the logs here".to_string(),
            title_link: Some("https://ci.example/job/iso/7/".to_string()),
        }
    }

    #[test]
    fn test_payload_shape() {
        let hook = SlackWebhook::new(None, "#builds", "iso #7");
        let payload = hook.payload(&danger());

        assert_eq!(payload["channel"], "#builds");
        assert_eq!(payload["text"], danger().text);
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["color"], "#FF3838");
        assert_eq!(attachment["author_name"], "builder");
        assert_eq!(attachment["title_link"], "https://ci.example/job/iso/7/");
        assert_eq!(attachment["fields"][0]["title"], "Priority");
        assert_eq!(attachment["fields"][0]["value"], "High");
        assert_eq!(attachment["footer"], "iso #7");
    }

    #[test]
    fn test_missing_link_serialises_empty() {
        let hook = SlackWebhook::new(None, "#builds", "");
        let mut note = danger();
        note.title_link = None;
        assert_eq!(hook.payload(&note)["attachments"][0]["title_link"], "");
    }

    #[test]
    fn test_colors() {
        assert_eq!(Severity::Good.color(), "#36a64f");
        assert_eq!(Severity::Warning.color(), "#E7FF1A");
        assert_eq!(Severity::Comment.color(), "#CDCDCD");
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_delivery_failure_is_swallowed() {
        // nothing listens on port 9 of localhost
        let hook = SlackWebhook::new(Some("http://127.0.0.1:9/hook".to_string()), "#builds", "");
        hook.send(&danger());
    }
}
