//! Hugging Face 格式的 llava-next 配置文件。
//!
//! `config.json` 里的 `text_config` 会省略和 Mistral 默认值相同的字段，
//! 这里用 serde 默认值补齐，再换算成 candle 的 `LLaVAConfig`。

use candle_transformers::models::clip::text_model::Activation;
use candle_transformers::models::clip::vision_model::ClipVisionConfig;
use candle_transformers::models::llava::config::LLaVAConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LlavaNextConfig {
    #[serde(default)]
    pub architectures: Vec<String>,
    pub image_grid_pinpoints: Vec<(u32, u32)>,
    #[serde(default = "default_image_token_index")]
    pub image_token_index: isize,
    #[serde(default = "default_projector_hidden_act")]
    pub projector_hidden_act: String,
    pub text_config: TextConfig,
    #[serde(default = "default_torch_dtype")]
    pub torch_dtype: String,
    #[serde(default)]
    pub vision_config: VisionConfig,
    #[serde(default = "default_vision_feature_layer")]
    pub vision_feature_layer: isize,
    #[serde(default = "default_vision_feature_select_strategy")]
    pub vision_feature_select_strategy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextConfig {
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_intermediate_size")]
    pub intermediate_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_text_model_type")]
    pub model_type: String,
    #[serde(default = "default_num_attention_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "default_num_key_value_heads")]
    pub num_key_value_heads: usize,
    #[serde(default)]
    pub pad_token_id: Option<usize>,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f32,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    #[serde(default)]
    pub tie_word_embeddings: Option<bool>,
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub hidden_size: usize,
    pub image_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub patch_size: usize,
    pub projection_dim: usize,
}

// CLIP ViT-L/14-336，llava-v1.6 全系列共用
impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            hidden_size: 1024,
            image_size: 336,
            intermediate_size: 4096,
            num_attention_heads: 16,
            num_hidden_layers: 24,
            patch_size: 14,
            projection_dim: 768,
        }
    }
}

/// `generation_config.json`，可能不存在
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_bos_token_id")]
    pub bos_token_id: usize,
    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            bos_token_id: default_bos_token_id(),
            eos_token_id: default_eos_token_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CropSize {
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShortestEdge {
    pub shortest_edge: u32,
}

/// `preprocessor_config.json`（LlavaNextImageProcessor）
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessorConfig {
    #[serde(default = "default_crop_size")]
    pub crop_size: CropSize,
    #[serde(default = "default_true")]
    pub do_center_crop: bool,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default = "default_image_mean")]
    pub image_mean: Vec<f32>,
    #[serde(default = "default_image_std")]
    pub image_std: Vec<f32>,
    #[serde(default = "default_resample")]
    pub resample: u32,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f32,
    #[serde(default = "default_size")]
    pub size: ShortestEdge,
}

impl LlavaNextConfig {
    pub fn to_clip_vision_config(&self) -> ClipVisionConfig {
        let vision = &self.vision_config;
        ClipVisionConfig {
            embed_dim: vision.hidden_size,
            activation: Activation::QuickGelu,
            intermediate_size: vision.intermediate_size,
            num_hidden_layers: vision.num_hidden_layers,
            num_attention_heads: vision.num_attention_heads,
            projection_dim: vision.projection_dim,
            num_channels: 3,
            image_size: vision.image_size,
            patch_size: vision.patch_size,
        }
    }

    pub fn to_llava_config(&self, generation: &GenerationConfig) -> LLaVAConfig {
        let text = &self.text_config;
        LLaVAConfig {
            architectures: self.architectures.clone(),
            bos_token_id: generation.bos_token_id,
            eos_token_id: generation.eos_token_id,
            hidden_size: text.hidden_size,
            image_aspect_ratio: "anyres".to_string(),
            image_crop_resolution: self.vision_config.image_size,
            image_grid_pinpoints: self.image_grid_pinpoints.clone(),
            image_split_resolution: self.vision_config.image_size,
            intermediate_size: text.intermediate_size,
            max_position_embeddings: text.max_position_embeddings,
            mm_hidden_size: self.vision_config.hidden_size,
            mm_patch_merge_type: "spatial_unpad".to_string(),
            mm_projector_type: projector_type(&self.projector_hidden_act),
            mm_use_im_start_end: false,
            mm_vision_select_feature: select_feature(&self.vision_feature_select_strategy),
            mm_vision_select_layer: self.vision_feature_layer,
            mm_vision_tower: None,
            model_type: text.model_type.clone(),
            num_attention_heads: text.num_attention_heads,
            num_hidden_layers: text.num_hidden_layers,
            num_key_value_heads: text.num_key_value_heads,
            pad_token_id: text.pad_token_id.unwrap_or(0),
            rms_norm_eps: text.rms_norm_eps,
            rope_theta: text.rope_theta,
            tokenizer_model_max_length: Some(4096),
            torch_dtype: self.torch_dtype.clone(),
            use_cache: true,
            vocab_size: text.vocab_size,
            image_token_index: self.image_token_index,
            hf: true,
            tie_word_embeddings: text.tie_word_embeddings,
        }
    }
}

// HF 的 "gelu" 投影就是两层 MLP
fn projector_type(act: &str) -> String {
    if act == "gelu" {
        "mlp2x_gelu".to_string()
    } else {
        act.to_string()
    }
}

fn select_feature(strategy: &str) -> String {
    if strategy == "default" {
        "patch".to_string()
    } else {
        "cls_patch".to_string()
    }
}

fn default_true() -> bool {
    true
}

fn default_image_token_index() -> isize {
    32000
}

fn default_projector_hidden_act() -> String {
    "gelu".to_string()
}

fn default_torch_dtype() -> String {
    "float16".to_string()
}

fn default_vision_feature_layer() -> isize {
    -2
}

fn default_vision_feature_select_strategy() -> String {
    "default".to_string()
}

fn default_hidden_size() -> usize {
    4096
}

fn default_intermediate_size() -> usize {
    14336
}

fn default_max_position_embeddings() -> usize {
    32768
}

fn default_text_model_type() -> String {
    "mistral".to_string()
}

fn default_num_attention_heads() -> usize {
    32
}

fn default_num_hidden_layers() -> usize {
    32
}

fn default_num_key_value_heads() -> usize {
    8
}

fn default_rms_norm_eps() -> f32 {
    1e-5
}

fn default_rope_theta() -> f32 {
    1_000_000.0
}

fn default_vocab_size() -> usize {
    32064
}

fn default_bos_token_id() -> usize {
    1
}

fn default_eos_token_id() -> usize {
    2
}

fn default_crop_size() -> CropSize {
    CropSize {
        height: 336,
        width: 336,
    }
}

fn default_size() -> ShortestEdge {
    ShortestEdge { shortest_edge: 336 }
}

#[allow(clippy::excessive_precision)]
fn default_image_mean() -> Vec<f32> {
    vec![0.48145466, 0.4578275, 0.40821073]
}

#[allow(clippy::excessive_precision)]
fn default_image_std() -> Vec<f32> {
    vec![0.26862954, 0.26130258, 0.27577711]
}

fn default_resample() -> u32 {
    3
}

fn default_rescale_factor() -> f32 {
    1.0 / 255.0
}
