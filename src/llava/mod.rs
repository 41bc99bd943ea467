pub mod config;
pub mod hub;
pub mod image_processor;

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{self, Cache};
use candle_transformers::models::llava::LLaVA;
use image::{DynamicImage, GenericImageView};
use tokenizers::Tokenizer;

use crate::settings::{DTypeSetting, DeviceSetting, ShimSettings};
use crate::template::IMAGE_PLACEHOLDER;

use self::config::{GenerationConfig, LlavaNextConfig, PreprocessorConfig};
use self::image_processor::ImageProcessor;

/// 加载好的 LLaVA-NeXT：权重、tokenizer、图片预处理。
///
/// candle 的 `LLaVA` 不是 Send/Sync，只能留在创建它的推理线程里。
pub struct LlavaModel {
    llava: LLaVA,
    llama_config: llama::Config,
    tokenizer: Tokenizer,
    image_processor: ImageProcessor,
    device: Device,
    dtype: DType,
    image_token_index: i64,
    eos_token_id: u32,
    seed: u64,
}

impl LlavaModel {
    pub fn load(settings: &ShimSettings) -> Result<Self> {
        let device = select_device(settings.device)?;
        let dtype = select_dtype(settings.dtype, &device);
        tracing::info!(
            model = %settings.model_id,
            revision = %settings.revision,
            ?device,
            ?dtype,
            "loading LLaVA model"
        );

        let start = std::time::Instant::now();
        let files = hub::fetch_model_files(&settings.model_id, &settings.revision)?;

        let model_config: LlavaNextConfig =
            serde_json::from_slice(&std::fs::read(&files.config)?).context("parsing config.json")?;
        let preprocessor_config: PreprocessorConfig =
            serde_json::from_slice(&std::fs::read(&files.preprocessor_config)?)
                .context("parsing preprocessor_config.json")?;
        let generation_config = match &files.generation_config {
            Some(path) => serde_json::from_slice(&std::fs::read(path)?)
                .context("parsing generation_config.json")?,
            None => GenerationConfig::default(),
        };

        let llava_config = model_config.to_llava_config(&generation_config);
        let llama_config = llava_config.to_llama_config();
        let clip_config = model_config.to_clip_vision_config();

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow::anyhow!("Error loading tokenizer: {e}"))?;

        let total_size_in_bytes: u64 = files
            .weights
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        // 权重文件以 mmap 方式映射，进程存活期间不能被改写
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)? };
        let llava = LLaVA::load(vb, &llava_config, Some(clip_config))?;
        tracing::info!(
            "[Candle] loaded {} weight files ({}) in {:.2}s",
            files.weights.len(),
            format_size(total_size_in_bytes as usize),
            start.elapsed().as_secs_f32(),
        );

        let eos_token_id = tokenizer
            .get_vocab(true)
            .get("</s>")
            .copied()
            .unwrap_or(llava_config.eos_token_id as u32);

        let image_processor =
            ImageProcessor::new(preprocessor_config, model_config.image_grid_pinpoints.clone())?;

        Ok(Self {
            llava,
            llama_config,
            tokenizer,
            image_processor,
            device,
            dtype,
            image_token_index: llava_config.image_token_index as i64,
            eos_token_id,
            seed: settings.seed,
        })
    }

    /// 贪心解码，返回 prompt + 生成部分一起解码后的文本（跳过特殊 token）
    pub fn generate(
        &self,
        prompt: &str,
        image: Option<&DynamicImage>,
        max_new_tokens: usize,
    ) -> Result<String> {
        let prompt_ids = self.tokenize(prompt)?;
        let input_ids = Tensor::new(prompt_ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let mut input_embeds = match image {
            Some(image) => {
                let pixel_values = self
                    .image_processor
                    .preprocess(image)?
                    .to_device(&self.device)?
                    .to_dtype(self.dtype)?;
                self.llava.prepare_inputs_labels_for_multimodal(
                    &input_ids,
                    &[pixel_values],
                    &[image.dimensions()],
                )?
            }
            None => self.llava.llama.embed(&input_ids)?,
        };

        let mut cache = Cache::new(true, self.dtype, &self.llama_config, &self.device)?;
        let mut logits_processor = LogitsProcessor::new(self.seed, None, None);
        let mut generated: Vec<u32> = Vec::new();
        let mut index_pos = 0;

        for index in 0..max_new_tokens {
            let (_, embeds_len, _) = input_embeds.dims3()?;
            // 第一步喂整段 prompt，之后每步只喂新 token，靠 KV cache 续上
            let (context_size, context_index) = if index > 0 {
                (1, index_pos)
            } else {
                (embeds_len, 0)
            };
            let input = input_embeds.i((.., embeds_len.saturating_sub(context_size).., ..))?;
            let logits = self
                .llava
                .forward(&input, context_index, &mut cache)?
                .squeeze(0)?;
            index_pos += input.dim(1)?;

            let next_token = logits_processor.sample(&logits)?;
            if next_token == self.eos_token_id {
                break;
            }
            generated.push(next_token);

            let next = Tensor::new(&[next_token], &self.device)?;
            let next_embeds = self.llava.llama.embed(&next)?.unsqueeze(0)?;
            input_embeds = Tensor::cat(&[input_embeds, next_embeds], 1)?;
        }
        tracing::debug!(
            prompt_tokens = prompt_ids.len(),
            generated_tokens = generated.len(),
            "generation finished"
        );

        // 和 prompt 一起解码；图片占位 token 不在词表里，先剔掉
        let mut out_tokens: Vec<u32> = prompt_ids
            .iter()
            .filter(|&&id| id != self.image_token_index)
            .map(|&id| id as u32)
            .collect();
        out_tokens.extend(generated.iter());
        let decoded = self
            .tokenizer
            .decode(&out_tokens, true)
            .map_err(|e| anyhow::anyhow!("Error decoding: {e}"))?;
        Ok(decoded)
    }

    /// 按 `<image>` 切开分别编码，中间插入图片 token
    fn tokenize(&self, prompt: &str) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for (i, chunk) in prompt.split(IMAGE_PLACEHOLDER).enumerate() {
            if i > 0 {
                ids.push(self.image_token_index);
            }
            let encoding = self
                .tokenizer
                .encode(chunk, i == 0)
                .map_err(|e| anyhow::anyhow!("Error encoding tokenizer: {e}"))?;
            ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
        }
        Ok(ids)
    }
}

fn select_device(setting: DeviceSetting) -> Result<Device> {
    let device = match setting {
        DeviceSetting::Cpu => Device::Cpu,
        DeviceSetting::Cuda => Device::new_cuda(0)?,
        DeviceSetting::Metal => Device::new_metal(0)?,
        DeviceSetting::Auto => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0)?
            } else if candle_core::utils::metal_is_available() {
                Device::new_metal(0)?
            } else {
                Device::Cpu
            }
        }
    };
    Ok(device)
}

/// 显卡上默认 f16，CPU 上默认 f32
fn select_dtype(setting: Option<DTypeSetting>, device: &Device) -> DType {
    match setting {
        Some(DTypeSetting::F16) => DType::F16,
        Some(DTypeSetting::Bf16) => DType::BF16,
        Some(DTypeSetting::F32) => DType::F32,
        None if device.is_cpu() => DType::F32,
        None => DType::F16,
    }
}

// 小工具：人类可读的字节数
fn format_size(size: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let size_f = size as f64;
    if size_f > GB {
        format!("{:.2} GiB", size_f / GB)
    } else if size_f > MB {
        format!("{:.2} MiB", size_f / MB)
    } else if size_f > KB {
        format!("{:.2} KiB", size_f / KB)
    } else {
        format!("{size} B")
    }
}
