//! A canned-response provider for tests, grounded on the teacher's `MockModel`
//! (round-robins through a fixed list of responses behind an atomic counter).

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::error::LlmError;
use super::{ChatOptions, ChatResponse};
use crate::message::Message;

/// A [`super::ChatProvider`] that returns a fixed sequence of responses,
/// cycling back to the start once exhausted. Useful for driving the turn
/// loop controller through deterministic scenarios in tests.
#[derive(Debug)]
pub struct MockProvider {
    model_id: String,
    responses: Vec<ChatResponse>,
    cursor: AtomicUsize,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Build a mock that cycles through `responses` in order.
    ///
    /// # Panics
    /// Panics if `responses` is empty — a mock with nothing to say is a test bug.
    #[must_use]
    pub fn new(model_id: impl Into<String>, responses: Vec<ChatResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "MockProvider requires at least one canned response"
        );
        Self {
            model_id: model_id.into(),
            responses,
            cursor: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Convenience constructor for a mock that always returns the same
    /// single-message response.
    #[must_use]
    pub fn single(model_id: impl Into<String>, message: Message) -> Self {
        Self::new(model_id, vec![ChatResponse::text(message)])
    }

    /// How many times [`super::ChatProvider::generate`] has been called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl super::ChatProvider for MockProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn generate(
        &self,
        _messages: Vec<Message>,
        _options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.responses.len();
        Ok(self.responses[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatProvider;

    #[tokio::test]
    async fn cycles_through_responses() {
        let mock = MockProvider::new(
            "mock/echo",
            vec![
                ChatResponse::text(Message::assistant("first")),
                ChatResponse::text(Message::assistant("second")),
            ],
        );
        let a = mock.generate(vec![], ChatOptions::default()).await.unwrap();
        let b = mock.generate(vec![], ChatOptions::default()).await.unwrap();
        let c = mock.generate(vec![], ChatOptions::default()).await.unwrap();
        assert_eq!(a.message.content, "first");
        assert_eq!(b.message.content, "second");
        assert_eq!(c.message.content, "first");
        assert_eq!(mock.call_count(), 3);
    }
}
