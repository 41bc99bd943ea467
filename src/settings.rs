use std::time::Duration;

use rocket::figment::providers::{Env, Format, Serialized, Toml};
use rocket::figment::{Figment, Profile};
use serde::{Deserialize, Serialize};

/// 对外暴露的模型名（响应里的 `model` 字段）
pub const SERVED_MODEL_NAME: &str = "llava-v1.6-mistral-7b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// 真实的 candle LLaVA-NeXT 推理
    Llava,
    /// 不加载模型，回显 prompt（本地开发 / 测试用）
    Echo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSetting {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DTypeSetting {
    F16,
    Bf16,
    F32,
}

/// `llava` 配置段，来自 Rocket.toml 或 `ROCKET_LLAVA=...`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimSettings {
    pub engine: EngineKind,
    pub model_id: String,
    pub revision: String,
    pub device: DeviceSetting,
    pub dtype: Option<DTypeSetting>,
    pub seed: u64,
    pub image_fetch_timeout_secs: u64,
    pub generation_timeout_secs: u64,
}

impl Default for ShimSettings {
    fn default() -> Self {
        Self {
            engine: EngineKind::Llava,
            model_id: "llava-hf/llava-v1.6-mistral-7b-hf".to_string(),
            revision: "main".to_string(),
            device: DeviceSetting::Auto,
            dtype: None,
            seed: 299792458,
            image_fetch_timeout_secs: 30,
            generation_timeout_secs: 300,
        }
    }
}

impl ShimSettings {
    pub fn image_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.image_fetch_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

/// Rocket 的 figment，换成本服务自己的默认值：
/// 监听所有网卡的 1234 端口，body 上限放宽到能装下 base64 图片。
pub fn figment() -> Figment {
    Figment::from(rocket::Config::default())
        .merge(Serialized::defaults(ServerDefaults::default()))
        .merge(Serialized::default("llava", ShimSettings::default()))
        .merge(Toml::file(Env::var_or("ROCKET_CONFIG", "Rocket.toml")).nested())
        .merge(Env::prefixed("ROCKET_").ignore(&["PROFILE"]).global())
        .select(Profile::from_env_or(
            "ROCKET_PROFILE",
            rocket::Config::DEFAULT_PROFILE,
        ))
}

pub fn shim_settings(figment: &Figment) -> anyhow::Result<ShimSettings> {
    let settings = figment.extract_inner::<ShimSettings>("llava")?;
    Ok(settings)
}

#[derive(Debug, Serialize)]
struct ServerDefaults {
    address: &'static str,
    port: u16,
    limits: BodyLimits,
}

#[derive(Debug, Serialize)]
struct BodyLimits {
    string: &'static str,
    json: &'static str,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            address: "0.0.0.0",
            port: 1234,
            limits: BodyLimits {
                string: "32 MiB",
                json: "32 MiB",
            },
        }
    }
}
