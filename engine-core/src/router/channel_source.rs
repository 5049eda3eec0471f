//! In-process [`CommandSource`] backed by a crossbeam channel. Mirrors the
//! donor's `execution::journal::AsyncJournal` shape: a bounded channel
//! decouples whatever accepts inbound commands (a CLI, an HTTP handler, a
//! test harness) from the consumer loop in [`super::run`], with a blocking
//! `recv` bridged onto the async side via `spawn_blocking` rather than a
//! busy poll.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use dashmap::DashMap;

use super::{CommandEnvelope, CommandReply, CommandSource};

/// Queue name paired with its envelope — the unit this source moves.
pub type QueuedCommand = (String, CommandEnvelope);

/// Crossbeam-channel-backed command source. [`Self::sender`] gives
/// producers a cheap cloneable handle to feed commands in; replies are held
/// in a short-lived map keyed by `request_id` until read or evicted by the
/// configured TTL.
pub struct ChannelCommandSource {
    receiver: Receiver<QueuedCommand>,
    sender: Sender<QueuedCommand>,
    replies: Arc<DashMap<String, CommandReply>>,
    reply_ttl: Duration,
}

impl ChannelCommandSource {
    pub fn new(capacity: usize, reply_ttl: Duration) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { receiver, sender, replies: Arc::new(DashMap::new()), reply_ttl }
    }

    /// A cloneable handle producers use to submit `(queue, envelope)` pairs.
    pub fn sender(&self) -> Sender<QueuedCommand> {
        self.sender.clone()
    }

    /// A reply already delivered for `request_id`, if still within its TTL
    /// window.
    pub fn reply_of(&self, request_id: &str) -> Option<CommandReply> {
        self.replies.get(request_id).map(|r| r.clone())
    }
}

#[async_trait::async_trait]
impl CommandSource for ChannelCommandSource {
    async fn next_command(&self) -> Option<(String, CommandEnvelope)> {
        let receiver = self.receiver.clone();
        tokio::task::spawn_blocking(move || receiver.recv().ok()).await.ok().flatten()
    }

    async fn reply(&self, request_id: &str, reply: CommandReply) {
        self.replies.insert(request_id.to_string(), reply);
        let replies = self.replies.clone();
        let ttl = self.reply_ttl;
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            replies.remove(&request_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(request_id: &str) -> CommandEnvelope {
        CommandEnvelope { request_id: request_id.to_string(), sub_account_id: "acct1".to_string(), payload: json!({}) }
    }

    #[tokio::test]
    async fn a_queued_command_is_delivered_to_next_command() {
        let source = ChannelCommandSource::new(8, Duration::from_secs(30));
        source.sender().send(("cmd:cancel".to_string(), envelope("r1"))).unwrap();

        let (queue, env) = source.next_command().await.unwrap();
        assert_eq!(queue, "cmd:cancel");
        assert_eq!(env.request_id, "r1");
    }

    #[tokio::test]
    async fn reply_is_readable_immediately_after_being_recorded() {
        let source = ChannelCommandSource::new(8, Duration::from_secs(30));
        source.reply(&"r2".to_string(), CommandReply::ok(json!({ "ok": true }))).await;
        let stored = source.reply_of("r2");
        assert!(stored.is_some());
        assert!(stored.unwrap().success);
    }
}
