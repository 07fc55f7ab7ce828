//! Messaging-platform boundary.
//!
//! The core never touches platform-specific types; everything user-visible
//! flows through [`ChatSink`], and QR rendering is delegated to the host via
//! [`QrEncoder`]. Hosts implement these two traits for their platform
//! (Telegram, Nostr DMs, a test harness) and hand them to the workflow.

use crate::errors::Result;
use crate::types::ConversationId;
use async_trait::async_trait;

/// Outbound messaging surface the core calls back into.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Sends a plain-text message to a conversation.
    async fn send_text(&self, conversation: &ConversationId, text: &str) -> Result<()>;

    /// Sends an image (e.g. an invoice QR code) with a caption.
    async fn send_image(
        &self,
        conversation: &ConversationId,
        image: Vec<u8>,
        caption: &str,
    ) -> Result<()>;
}

/// Renders a payable string into a QR image.
///
/// Rendering is a host concern; a host without image support can return an
/// empty buffer and rely on the plain-text payment request.
pub trait QrEncoder: Send + Sync {
    /// Encodes `data` into PNG bytes.
    fn encode(&self, data: &str) -> Result<Vec<u8>>;
}
