use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::engine::{GenerationRequest, InferenceEngine};
use crate::fetch::ImageFetcher;
use crate::prompt::{resolve_messages, ResolvedPrompt};
use crate::template::{clean_response, Conversation};

/// 带图时最多生成的 token 数
pub const IMAGE_MAX_NEW_TOKENS: usize = 200;
/// 纯文本时最多生成的 token 数
pub const TEXT_MAX_NEW_TOKENS: usize = 500;

/// 模型包装层：messages → prompt → 生成 → 清洗后的回答。
///
/// 内部任何失败（消息格式、图片解码、推理、超时）都只记日志并返回 `None`，
/// 由 HTTP 层统一映射成 500。
pub struct VisionAssistant {
    engine: Arc<dyn InferenceEngine>,
    fetcher: Arc<dyn ImageFetcher>,
    generation_timeout: Duration,
}

impl VisionAssistant {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        fetcher: Arc<dyn ImageFetcher>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            fetcher,
            generation_timeout,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub async fn process_request(&self, messages: &Value) -> Option<String> {
        let resolved = match resolve_messages(messages, self.fetcher.as_ref()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!("Request processing error: {e}");
                return None;
            }
        };
        self.answer(resolved).await
    }

    async fn answer(&self, resolved: ResolvedPrompt) -> Option<String> {
        let ResolvedPrompt { text, image } = resolved;
        let (conversation, max_new_tokens) = match image {
            Some(_) => (Conversation::with_image(&text), IMAGE_MAX_NEW_TOKENS),
            None => (Conversation::text_only(&text), TEXT_MAX_NEW_TOKENS),
        };
        let path = if conversation.has_image() { "image+text" } else { "text-only" };

        let request = GenerationRequest {
            prompt: conversation.render(),
            image,
            max_new_tokens,
        };
        let raw = match tokio::time::timeout(self.generation_timeout, self.engine.generate(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::error!("LLM completion error ({path}): {e:#}");
                return None;
            }
            Err(_) => {
                tracing::error!(
                    "LLM completion ({path}) exceeded {:?}, giving up",
                    self.generation_timeout
                );
                return None;
            }
        };
        tracing::debug!("Raw output: {raw}");
        Some(clean_response(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EchoEngine;
    use crate::testing::{png_data_uri, RecordingEngine, StalledEngine, StubFetcher};
    use serde_json::json;

    fn assistant(engine: Arc<dyn InferenceEngine>) -> VisionAssistant {
        VisionAssistant::new(engine, Arc::new(StubFetcher::failing()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn text_only_uses_larger_budget() {
        let engine = RecordingEngine::new();
        let answer = assistant(engine.clone())
            .process_request(&json!([{"role": "user", "content": "hello"}]))
            .await;
        assert_eq!(answer.as_deref(), Some("HELLO"));

        let calls = engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "[INST] hello [/INST]");
        assert_eq!(calls[0].max_new_tokens, TEXT_MAX_NEW_TOKENS);
        assert_eq!(calls[0].image, None);
    }

    #[tokio::test]
    async fn image_uses_smaller_budget_and_placeholder() {
        let engine = RecordingEngine::new();
        let messages = json!([{"role": "user", "content": [
            {"type": "image_url", "image_url": {"url": png_data_uri(5, 4)}},
            {"type": "text", "text": "what is this?"},
        ]}]);
        assistant(engine.clone()).process_request(&messages).await.unwrap();

        let calls = engine.calls();
        assert_eq!(calls[0].prompt, "[INST] <image>\nwhat is this? [/INST]");
        assert_eq!(calls[0].max_new_tokens, IMAGE_MAX_NEW_TOKENS);
        assert_eq!(calls[0].image, Some((5, 4)));
    }

    #[tokio::test]
    async fn missing_text_never_reaches_the_model() {
        let engine = RecordingEngine::new();
        let messages = json!([{"role": "user", "content": [
            {"type": "image_url", "image_url": {"url": png_data_uri(1, 1)}},
        ]}]);
        assert!(assistant(engine.clone()).process_request(&messages).await.is_none());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_becomes_none() {
        let engine = RecordingEngine::failing();
        let answer = assistant(engine)
            .process_request(&json!([{"role": "user", "content": "hello"}]))
            .await;
        assert!(answer.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_generation_times_out() {
        let assistant = VisionAssistant::new(
            Arc::new(StalledEngine),
            Arc::new(StubFetcher::failing()),
            Duration::from_secs(300),
        );
        let answer = assistant
            .process_request(&json!([{"role": "user", "content": "hello"}]))
            .await;
        assert!(answer.is_none());
    }

    #[tokio::test]
    async fn echo_engine_end_to_end() {
        let answer = assistant(EchoEngine::new("llava-v1.6-mistral-7b"))
            .process_request(&json!([{"role": "user", "content": "hello"}]))
            .await;
        assert_eq!(answer.as_deref(), Some("[llava-v1.6-mistral-7b ECHO] HELLO"));
    }
}
