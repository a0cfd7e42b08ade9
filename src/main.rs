use anyhow::Result;
use std::sync::Arc;

use novel2manju::core::config::Config;
use novel2manju::core::io::NativeStorage;
use novel2manju::services::llm::{create_llm, LlmClient};
use novel2manju::services::workflow::WorkflowManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let llm: Arc<dyn LlmClient> = Arc::from(create_llm(&config, None)?);
    let script_llm: Arc<dyn LlmClient> = match config.llm.script_model.as_deref() {
        Some(model) => Arc::from(create_llm(&config, Some(model))?),
        None => llm.clone(),
    };

    let storage = Arc::new(NativeStorage::new());
    let manager = WorkflowManager::new(config, llm, script_llm, storage);

    // An explicit path wins over picking from the input folder.
    let source = match std::env::args().nth(1) {
        Some(path) => path,
        None => manager.select_source().await?,
    };

    let summary = manager.run(&source).await?;
    println!(
        "Done: {} generated, {} already present, {} failed.",
        summary.generated,
        summary.unchanged,
        summary.failed.len()
    );

    Ok(())
}
