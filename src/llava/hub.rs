use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};

/// 从 hub 拉下来的本地文件路径
pub struct ModelFiles {
    pub config: PathBuf,
    pub preprocessor_config: PathBuf,
    pub generation_config: Option<PathBuf>,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// 通过 hf-hub 下载（或命中本地缓存）模型所需的全部文件
pub fn fetch_model_files(model_id: &str, revision: &str) -> Result<ModelFiles> {
    let api = Api::new()?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let config = repo
        .get("config.json")
        .with_context(|| format!("fetching config.json from {model_id}"))?;
    let preprocessor_config = repo
        .get("preprocessor_config.json")
        .with_context(|| format!("fetching preprocessor_config.json from {model_id}"))?;
    let generation_config = repo.get("generation_config.json").ok();
    let tokenizer = repo
        .get("tokenizer.json")
        .with_context(|| format!("fetching tokenizer.json from {model_id}"))?;

    let weights = match repo.get("model.safetensors.index.json") {
        Ok(index_path) => {
            let index: serde_json::Value = serde_json::from_slice(&std::fs::read(&index_path)?)?;
            shard_names(&index)?
                .iter()
                .map(|name| {
                    repo.get(name)
                        .with_context(|| format!("fetching weight shard {name}"))
                })
                .collect::<Result<Vec<_>>>()?
        }
        // 单文件权重
        Err(_) => vec![repo
            .get("model.safetensors")
            .with_context(|| format!("fetching model.safetensors from {model_id}"))?],
    };

    Ok(ModelFiles {
        config,
        preprocessor_config,
        generation_config,
        tokenizer,
        weights,
    })
}

/// `model.safetensors.index.json` 里 weight_map 指向的分片文件名（去重、有序）
pub fn shard_names(index: &serde_json::Value) -> Result<Vec<String>> {
    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .context("weight_map missing from safetensors index")?;
    let names: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect();
    Ok(names.into_iter().collect())
}
