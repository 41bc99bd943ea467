use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use crate::engine::GenerationRequest;
use crate::llava::LlavaModel;
use crate::settings::ShimSettings;

/// 发给推理线程的一次生成任务
pub struct InferenceJob {
    pub request: GenerationRequest,
    pub response_tx: oneshot::Sender<Result<String>>,
}

/// 推理线程：加载并独占模型（candle 的 LLaVA 不是 Send/Sync），
/// 按到达顺序逐个处理任务。加载结果通过 `ready_tx` 报告。
pub fn inference_thread(
    settings: ShimSettings,
    rx: mpsc::Receiver<InferenceJob>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let model = match LlavaModel::load(&settings) {
        Ok(model) => model,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    tracing::info!("Inference thread ready, processing requests...");

    serve_jobs(rx, |request| {
        model.generate(
            &request.prompt,
            request.image.as_ref(),
            request.max_new_tokens,
        )
    });
    tracing::info!("Inference thread shutting down");
}

/// 按到达顺序逐个执行任务，直到所有发送端关闭。
/// 调用方已经超时放弃的任务不再生成，直接跳过。
pub fn serve_jobs<F>(mut rx: mpsc::Receiver<InferenceJob>, mut generate: F)
where
    F: FnMut(&GenerationRequest) -> Result<String>,
{
    while let Some(job) = rx.blocking_recv() {
        let InferenceJob {
            request,
            response_tx,
        } = job;
        if response_tx.is_closed() {
            tracing::warn!("skipping job, the caller already gave up");
            continue;
        }
        let result = generate(&request);
        if response_tx.send(result).is_err() {
            tracing::warn!("generation finished after the caller gave up");
        }
    }
}
