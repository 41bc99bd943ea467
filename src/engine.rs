use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use tokio::sync::{mpsc, oneshot};

use crate::inference::{inference_thread, InferenceJob};
use crate::settings::ShimSettings;
use crate::template::{IMAGE_PLACEHOLDER, INST_CLOSE};

/// 一次生成：已经套好模板的 prompt、可选图片、最多生成多少 token
pub struct GenerationRequest {
    pub prompt: String,
    pub image: Option<DynamicImage>,
    pub max_new_tokens: usize,
}

/// 统一的推理引擎抽象。
///
/// 返回的是原始解码文本：回显的 prompt 加上模型回答，清洗交给调用方。
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

/// Echo 实现：不加载模型，把 prompt 里的用户文本转成大写当作回答
pub struct EchoEngine {
    pub model_name: String,
}

impl EchoEngine {
    pub fn new(model_name: &str) -> Arc<Self> {
        Arc::new(Self {
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl InferenceEngine for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let user_text = request
            .prompt
            .replace("[INST]", "")
            .replace(INST_CLOSE, "")
            .replace(IMAGE_PLACEHOLDER, "");
        let mut answer = format!("[{} ECHO] {}", self.model_name, user_text.trim().to_uppercase());
        if let Some(image) = &request.image {
            let (w, h) = image.dimensions();
            answer.push_str(&format!(" (image {w}x{h})"));
        }
        Ok(format!("{} {}", request.prompt, answer))
    }
}

/// candle LLaVA-NeXT。模型留在专用推理线程里，这里只持有任务通道。
pub struct LlavaEngine {
    jobs: mpsc::Sender<InferenceJob>,
}

impl LlavaEngine {
    /// 启动推理线程并等待模型加载完成
    pub async fn spawn(settings: ShimSettings) -> Result<Arc<Self>> {
        let (jobs, rx) = mpsc::channel::<InferenceJob>(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("llava-inference".to_string())
            .spawn(move || inference_thread(settings, rx, ready_tx))?;

        ready_rx
            .await
            .context("inference thread exited before the model was loaded")??;
        Ok(Arc::new(Self { jobs }))
    }
}

#[async_trait]
impl InferenceEngine for LlavaEngine {
    fn name(&self) -> &'static str {
        "llava"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.jobs
            .send(InferenceJob {
                request,
                response_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("inference thread is gone"))?;
        response_rx
            .await
            .context("inference thread dropped the job")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{clean_response, Conversation};

    #[tokio::test]
    async fn echo_engine_echoes_prompt_then_answers() {
        let engine = EchoEngine::new("llava-test");
        let prompt = Conversation::text_only("hello").render();
        let raw = engine
            .generate(GenerationRequest {
                prompt: prompt.clone(),
                image: None,
                max_new_tokens: 500,
            })
            .await
            .unwrap();
        assert!(raw.starts_with(&prompt));
        assert_eq!(clean_response(&raw), "[llava-test ECHO] HELLO");
    }

    #[tokio::test]
    async fn echo_engine_reports_image_size() {
        let engine = EchoEngine::new("llava-test");
        let raw = engine
            .generate(GenerationRequest {
                prompt: Conversation::with_image("what is this?").render(),
                image: Some(DynamicImage::new_rgb8(4, 3)),
                max_new_tokens: 200,
            })
            .await
            .unwrap();
        assert_eq!(
            clean_response(&raw),
            "[llava-test ECHO] WHAT IS THIS? (image 4x3)"
        );
    }
}
