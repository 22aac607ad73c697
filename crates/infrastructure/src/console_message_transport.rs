//! Console transport for development. Logs notifications to tracing output.

use async_trait::async_trait;
use grantwarden_application::{MessageTransport, NotificationPayload};
use grantwarden_core::AppResult;
use grantwarden_domain::Subject;
use tracing::info;

use crate::message_rendering::render_text_body;

/// Development transport that logs notifications to the console.
#[derive(Clone)]
pub struct ConsoleMessageTransport;

impl ConsoleMessageTransport {
    /// Creates a new console transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleMessageTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageTransport for ConsoleMessageTransport {
    async fn send(&self, recipient: &Subject, payload: &NotificationPayload) -> AppResult<()> {
        info!(
            to = %recipient,
            notification_type = payload.notification_type.as_str(),
            template = payload.template_key.as_str(),
            "--- NOTIFICATION (console) ---\nTo: {}\n\n{}--- END NOTIFICATION ---",
            recipient,
            render_text_body(payload)
        );

        Ok(())
    }
}
