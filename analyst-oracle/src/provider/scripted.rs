//! Scripted provider - a deterministic stand-in for a real model
//!
//! Replies come from a queue first, then from an optional responder closure
//! that sees the whole conversation. Every conversation is recorded so
//! callers can assert on what was asked.

use super::*;
use std::collections::VecDeque;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String, ProviderError> + Send + Sync>;

/// Provider that answers from a script instead of a model
#[derive(Default)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<String, ProviderError>>>,
    responder: Option<Responder>,
    conversations: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with each string in order
    pub fn from_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for reply in replies {
            provider.push_reply(reply);
        }
        provider
    }

    /// Compute every reply from the conversation
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.queue).push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, error: ProviderError) {
        lock(&self.queue).push_back(Err(error));
    }

    /// Every conversation received so far, oldest first
    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.conversations).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.conversations).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let index = {
            let mut conversations = lock(&self.conversations);
            conversations.push(request.messages.clone());
            conversations.len()
        };

        let queued = lock(&self.queue).pop_front();
        let reply = match (queued, &self.responder) {
            (Some(reply), _) => reply?,
            (None, Some(responder)) => responder(&request.messages)?,
            (None, None) => {
                return Err(ProviderError::Other(format!(
                    "script exhausted at call {}",
                    index
                )))
            }
        };

        let prompt_tokens: usize = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum();
        let completion_tokens = reply.split_whitespace().count();

        Ok(CompletionResponse {
            id: format!("scripted-{}", index),
            model: request.model.unwrap_or_else(|| self.default_model().to_string()),
            content: Some(reply),
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_exhausted() {
        let provider = ScriptedProvider::from_replies(["one", "two"]);

        assert_eq!(provider.call(vec![ChatMessage::user("a")]).await.unwrap(), "one");
        assert_eq!(provider.call(vec![ChatMessage::user("b")]).await.unwrap(), "two");
        assert!(provider.call(vec![ChatMessage::user("c")]).await.is_err());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_queued_error_is_returned() {
        let provider = ScriptedProvider::new();
        provider.push_error(ProviderError::Network("connection reset".into()));

        let err = provider.call(vec![ChatMessage::user("a")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn test_responder_sees_conversation() {
        let provider = ScriptedProvider::from_fn(|messages| {
            Ok(format!("{} turns, last from {}", messages.len(), messages[messages.len() - 1].role.as_str()))
        });

        let reply = provider
            .call(vec![ChatMessage::system("s"), ChatMessage::user("u")])
            .await
            .unwrap();
        assert_eq!(reply, "2 turns, last from user");
        assert_eq!(provider.conversations()[0][0], ChatMessage::system("s"));
    }

    #[tokio::test]
    async fn test_queue_takes_priority_over_responder() {
        let provider = ScriptedProvider::from_fn(|_| Ok("fallback".into()));
        provider.push_reply("  queued  ");

        assert_eq!(provider.call(vec![ChatMessage::user("a")]).await.unwrap(), "queued");
        assert_eq!(provider.call(vec![ChatMessage::user("b")]).await.unwrap(), "fallback");
    }
}
