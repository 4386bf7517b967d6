//! User prompts.
//!
//! Some actions need free text from the user, such as the description of a
//! new log event. The session asks through a [`Prompter`], which a front end
//! implements. [`ChannelPrompter`] turns every prompt into a message on an
//! mpsc channel so that a UI loop elsewhere can answer it.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A question for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// Identifies the prompt among those in flight.
    pub id: u64,
    pub message: String,
}

/// Asks the user for text.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Returns `None` if the user dismissed the prompt.
    async fn prompt(&self, message: &str) -> Option<String>;
}

/// Prompter that always dismisses. For headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompter;

#[async_trait]
impl Prompter for NoPrompter {
    async fn prompt(&self, _message: &str) -> Option<String> {
        None
    }
}

/// A prompt waiting for an answer from the front end.
#[derive(Debug)]
pub struct PendingPrompt {
    pub request: PromptRequest,
    reply: oneshot::Sender<Option<String>>,
}

impl PendingPrompt {
    /// Answer the prompt. `None` dismisses it.
    pub fn respond(self, answer: Option<String>) {
        if self.reply.send(answer).is_err() {
            debug!(id = self.request.id, "prompt answered after the asker gave up");
        }
    }
}

/// [`Prompter`] backed by a channel of [`PendingPrompt`]s.
#[derive(Debug)]
pub struct ChannelPrompter {
    tx: mpsc::Sender<PendingPrompt>,
    next_id: AtomicU64,
}

impl ChannelPrompter {
    /// Create the prompter and the receiver the front end answers from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingPrompt>) {
        let (tx, rx) = mpsc::channel(capacity);
        let prompter = ChannelPrompter {
            tx,
            next_id: AtomicU64::new(1),
        };
        (prompter, rx)
    }
}

#[async_trait]
impl Prompter for ChannelPrompter {
    async fn prompt(&self, message: &str) -> Option<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = PromptRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.to_string(),
        };
        self.tx
            .send(PendingPrompt {
                request,
                reply: reply_tx,
            })
            .await
            .ok()?;
        reply_rx.await.ok().flatten()
    }
}
