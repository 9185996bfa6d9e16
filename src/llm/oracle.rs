// The perception oracle: a vision-capable chat model asked one question about one frame.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage};
use crate::perception::types::Snapshot;

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Free-text answer to `query` about `snapshot`.
    async fn ask(&self, query: &str, snapshot: &Snapshot) -> SteadyhandResult<String>;
}

/// An [`Oracle`] backed by a chat provider resolved for one role.
pub struct RoleOracle {
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
    system_prompt: String,
    timeout: Duration,
}

impl RoleOracle {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        call: CallConfig,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            call,
            system_prompt: system_prompt.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Oracle for RoleOracle {
    async fn ask(&self, query: &str, snapshot: &Snapshot) -> SteadyhandResult<String> {
        let frame = snapshot.clone();
        let image_url = tokio::task::spawn_blocking(move || frame.to_data_url())
            .await
            .map_err(|e| SteadyhandError::Perception(format!("encode task panicked: {e}")))??;

        let messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user_with_image(query, image_url),
        ];

        let response = tokio::time::timeout(self.timeout, self.provider.chat(messages, &self.call))
            .await
            .map_err(|_| {
                SteadyhandError::Oracle(format!(
                    "{} did not answer within {:?}",
                    self.provider.name(),
                    self.timeout
                ))
            })??;

        tracing::debug!(
            provider = %self.provider.name(),
            model = %self.call.model,
            reply_len = response.content.len(),
            "oracle answered"
        );
        Ok(response.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{LlmResponse, MessageContent};
    use std::sync::Mutex;

    struct EchoProvider {
        delay: Duration,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> SteadyhandResult<LlmResponse> {
            tokio::time::sleep(self.delay).await;
            *self.seen.lock().unwrap() = messages;
            Ok(LlmResponse {
                content: "  move to (1, 2)\n".into(),
                reasoning: String::new(),
            })
        }
    }

    fn call() -> CallConfig {
        CallConfig {
            model: "m".into(),
            stream: false,
            temperature: 0.1,
        }
    }

    #[tokio::test]
    async fn sends_system_prompt_and_image() {
        let provider = Arc::new(EchoProvider {
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        });
        let oracle = RoleOracle::new(provider.clone(), call(), "you point", Duration::from_secs(5));

        let reply = oracle.ask("where is OK?", &Snapshot::blank(4, 4)).await.unwrap();
        assert_eq!(reply, "move to (1, 2)");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].role, "system");
        match &seen[1].content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            MessageContent::Text(_) => panic!("expected an image part"),
        }
    }

    #[tokio::test]
    async fn hung_provider_times_out() {
        let provider = Arc::new(EchoProvider {
            delay: Duration::from_secs(30),
            seen: Mutex::new(Vec::new()),
        });
        let oracle = RoleOracle::new(provider, call(), "", Duration::from_millis(20));
        let err = oracle.ask("?", &Snapshot::blank(4, 4)).await.unwrap_err();
        assert!(matches!(err, SteadyhandError::Oracle(_)));
    }
}
