//! Scoped ownership of an oracle conversation.

use std::sync::Arc;

use matchwork_ai::Conversation;
use tokio::runtime::Handle;
use tracing::warn;

/// Closes the wrapped conversation exactly once.
///
/// The normal path calls [`ConversationGuard::close`]. If the guard is dropped
/// instead (early return, panic, cancelled future) the close is spawned on the
/// current runtime.
pub struct ConversationGuard {
    conversation: Arc<dyn Conversation>,
    closed: bool,
}

impl ConversationGuard {
    pub fn new(conversation: Box<dyn Conversation>) -> Self {
        Self {
            conversation: Arc::from(conversation),
            closed: false,
        }
    }

    pub fn conversation(&self) -> &dyn Conversation {
        self.conversation.as_ref()
    }

    /// Release the conversation. Failures are logged only.
    pub async fn close(mut self) {
        self.closed = true;
        close_logged(Arc::clone(&self.conversation)).await;
    }
}

async fn close_logged(conversation: Arc<dyn Conversation>) {
    if let Err(e) = conversation.close().await {
        warn!(
            session_id = %conversation.key().session_id,
            error = %e,
            "failed to close oracle conversation"
        );
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let conversation = Arc::clone(&self.conversation);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_logged(conversation));
            }
            Err(_) => warn!(
                session_id = %conversation.key().session_id,
                "no runtime to close oracle conversation"
            ),
        }
    }
}
