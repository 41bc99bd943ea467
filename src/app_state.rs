use std::sync::Arc;

use anyhow::Result;

use crate::assistant::VisionAssistant;
use crate::engine::{EchoEngine, InferenceEngine, LlavaEngine};
use crate::fetch::{HttpImageFetcher, ImageFetcher};
use crate::settings::{EngineKind, ShimSettings, SERVED_MODEL_NAME};

/// 全局共享状态：启动时构造一次，之后只读。
/// - assistant: 模型包装层（持有推理引擎和图片下载器）
pub struct AppState {
    pub assistant: VisionAssistant,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        fetcher: Arc<dyn ImageFetcher>,
        settings: &ShimSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            assistant: VisionAssistant::new(engine, fetcher, settings.generation_timeout()),
        })
    }

    /// 按配置创建引擎。真实模型在这里加载，完成前不对外提供服务。
    pub async fn from_settings(settings: &ShimSettings) -> Result<Arc<Self>> {
        let engine: Arc<dyn InferenceEngine> = match settings.engine {
            EngineKind::Llava => LlavaEngine::spawn(settings.clone()).await?,
            EngineKind::Echo => EchoEngine::new(SERVED_MODEL_NAME),
        };
        tracing::info!(engine = engine.name(), "model ready");

        let fetcher = Arc::new(HttpImageFetcher::new(settings.image_fetch_timeout())?);
        Ok(Self::new(engine, fetcher, settings))
    }
}
