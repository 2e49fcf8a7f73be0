use anyhow::{Context, Result};
use std::sync::Arc;
use storybook::core::config::Config;
use storybook::core::io::{NativeStorage, Storage};
use storybook::core::models::StoryForm;
use storybook::services::workflow::StoryWorkflow;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Fix or remove 'config.yml' to continue with the defaults.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let workflow = StoryWorkflow::new(config, storage.clone()).await?;

    match std::env::args().nth(1) {
        Some(path) => run_request(&workflow, storage.as_ref(), &path).await,
        None if workflow.config().unattended => {
            eprintln!("Unattended mode needs a request file: storybook <request.yml>");
            Ok(())
        }
        None => storybook::ui::run(&workflow).await,
    }
}

/// Generates and exports the story described by a YAML request file.
async fn run_request(workflow: &StoryWorkflow, storage: &dyn Storage, path: &str) -> Result<()> {
    let bytes = storage.read(path).await?;
    let form: StoryForm = serde_yaml_ng::from_slice(&bytes)
        .with_context(|| format!("Failed to parse request file {}", path))?;

    let story = workflow.generate(form.into_request()).await?;
    println!("Created story #{}: {}", story.id, story.title);

    if let Some(pdf) = workflow.export_pdf(story.id).await? {
        println!("PDF saved to {}", pdf);
    }
    Ok(())
}
