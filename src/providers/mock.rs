use super::*;
use parking_lot::Mutex;
use std::collections::VecDeque;

pub const DEFAULT_REPLY: &str =
    r#"{"thought":"Mock Task Completed.","action":"task_complete","args":{"result":"Done"}}"#;

/// Offline provider. Replies come from a script queue; once it is empty every
/// call answers with a `task_complete` decision. Conversations are recorded.
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies<I, S>(name: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::named(name);
        for reply in replies {
            provider.push_reply(reply);
        }
        provider
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script.lock().push_back(Ok(reply.into()));
    }

    /// Queues a failed generation.
    pub fn push_error(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(message.into()));
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, messages: &[Message], _config: &GenerationConfig) -> Result<String> {
        self.calls.lock().push(messages.to_vec());
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(DEFAULT_REPLY.to_string()),
        }
    }
}
