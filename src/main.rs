#[macro_use]
extern crate rocket;

mod api;
mod app_state;
mod assistant;
mod engine;
mod error;
mod fetch;
mod inference;
mod llava;
mod prompt;
mod settings;
mod template;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use rocket::figment::Figment;
use rocket::{Build, Rocket};
use tracing_subscriber::EnvFilter;

use api::{bad_request, chat_completions, default_catcher, health, internal_error, list_models, not_found};
use app_state::AppState;

pub fn build(figment: Figment, state: Arc<AppState>) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .mount("/", routes![health, list_models, chat_completions])
        .register(
            "/",
            catchers![bad_request, not_found, internal_error, default_catcher],
        )
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,llava_shim=debug")),
        )
        .init();

    let figment = settings::figment();
    let shim = settings::shim_settings(&figment)?;
    tracing::info!(
        engine = ?shim.engine,
        model_id = %shim.model_id,
        device = ?shim.device,
        "starting llava shim"
    );

    // 模型加载完成后才开始监听端口
    let state = AppState::from_settings(&shim).await?;
    let _ = build(figment, state).launch().await?;
    Ok(())
}
