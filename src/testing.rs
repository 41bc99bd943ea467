//! 测试用桩：远程图片下载、记录调用的引擎、卡死的引擎

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine as _;
use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::engine::{GenerationRequest, InferenceEngine};
use crate::error::FetchError;
use crate::fetch::ImageFetcher;

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

pub fn png_data_uri(width: u32, height: u32) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(png_bytes(width, height));
    format!("data:image/png;base64,{payload}")
}

/// 远程下载桩：要么返回固定尺寸的图，要么一律失败
pub struct StubFetcher {
    serve: Option<(u32, u32)>,
    requested: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn serving(width: u32, height: u32) -> Self {
        Self {
            serve: Some((width, height)),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            serve: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<DynamicImage, FetchError> {
        self.requested.lock().unwrap().push(url.to_string());
        match self.serve {
            Some((w, h)) => Ok(image::load_from_memory(&png_bytes(w, h))?),
            // 不是合法图片字节
            None => Err(image::load_from_memory(b"<html>404</html>")
                .err()
                .unwrap()
                .into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub image: Option<(u32, u32)>,
}

/// 记录每次调用，回答为 prompt 里用户文本的大写
pub struct RecordingEngine {
    calls: Mutex<Vec<RecordedCall>>,
    fail: bool,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: request.prompt.clone(),
            max_new_tokens: request.max_new_tokens,
            image: request.image.as_ref().map(|i| i.dimensions()),
        });
        if self.fail {
            anyhow::bail!("device lost");
        }
        let text = request
            .prompt
            .trim_start_matches("[INST] ")
            .trim_end_matches(" [/INST]")
            .trim_start_matches("<image>\n");
        Ok(format!("{} {}", request.prompt, text.to_uppercase()))
    }
}

/// 永远不返回的引擎
pub struct StalledEngine;

#[async_trait]
impl InferenceEngine for StalledEngine {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<String> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}
