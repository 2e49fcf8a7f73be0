//! Interactive terminal menu.

use anyhow::Result;
use inquire::error::InquireError;
use inquire::{Confirm, CustomType, Password, Select, Text};
use std::fmt;

use crate::core::models::{
    AgeGroup, IllustrationStyle, Story, StoryRequest, MAX_CHARACTER_COUNT, MAX_ILLUSTRATION_COUNT,
    MIN_CHARACTER_COUNT, MIN_ILLUSTRATION_COUNT,
};
use crate::services::settings::{validate_api_key, Preferences, PROVIDERS};
use crate::services::workflow::StoryWorkflow;

const STYLE_TAGS: [&str; 4] = ["watercolor", "sketch", "digital", "cartoon"];
const RECENT_LIMIT: usize = 20;
const EDIT_PREFERENCES: &str = "Default provider and style";
const CLEAR_KEYS: &str = "Clear all keys";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuItem {
    Create,
    List,
    Read,
    Search,
    Export,
    Regenerate,
    Delete,
    ApiKeys,
    EnhancerHealth,
    Quit,
}

impl MenuItem {
    const ALL: [MenuItem; 10] = [
        MenuItem::Create,
        MenuItem::List,
        MenuItem::Read,
        MenuItem::Search,
        MenuItem::Export,
        MenuItem::Regenerate,
        MenuItem::Delete,
        MenuItem::ApiKeys,
        MenuItem::EnhancerHealth,
        MenuItem::Quit,
    ];
}

impl fmt::Display for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MenuItem::Create => "Create a new story",
            MenuItem::List => "List stories",
            MenuItem::Read => "Read a story",
            MenuItem::Search => "Search stories",
            MenuItem::Export => "Export a story as PDF",
            MenuItem::Regenerate => "Regenerate an illustration",
            MenuItem::Delete => "Delete a story",
            MenuItem::ApiKeys => "Manage API keys",
            MenuItem::EnhancerHealth => "Check prompt enhancer",
            MenuItem::Quit => "Quit",
        };
        f.write_str(label)
    }
}

/// A story as it appears in selection lists.
#[derive(Clone)]
struct StoryChoice {
    id: u64,
    label: String,
}

impl fmt::Display for StoryChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn story_line(story: &Story) -> String {
    let date = story.created_at.split('T').next().unwrap_or(&story.created_at);
    let exported = if story.pdf_url.is_some() { ", exported" } else { "" };
    format!(
        "#{} {} ({}, ages {}, {} illustrations{})",
        story.id,
        story.title,
        date,
        story.target_age_group,
        story.image_urls.len(),
        exported
    )
}

fn is_cancel(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<InquireError>(),
        Some(InquireError::OperationCanceled) | Some(InquireError::OperationInterrupted)
    )
}

pub async fn run(workflow: &StoryWorkflow) -> Result<()> {
    println!("StoryBook Magic");
    loop {
        let choice = match Select::new("What would you like to do?", MenuItem::ALL.to_vec()).prompt() {
            Ok(choice) => choice,
            Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => break,
            Err(e) => return Err(e.into()),
        };

        let result = match choice {
            MenuItem::Create => create_story(workflow).await,
            MenuItem::List => list_stories(workflow).await,
            MenuItem::Read => read_story(workflow).await,
            MenuItem::Search => search_stories(workflow).await,
            MenuItem::Export => export_story(workflow).await,
            MenuItem::Regenerate => regenerate_illustration(workflow).await,
            MenuItem::Delete => delete_story(workflow).await,
            MenuItem::ApiKeys => manage_api_keys(workflow).await,
            MenuItem::EnhancerHealth => enhancer_health(workflow).await,
            MenuItem::Quit => break,
        };

        if let Err(e) = result {
            if is_cancel(&e) {
                println!("Cancelled.");
            } else {
                eprintln!("Error: {:#}", e);
            }
        }
    }
    Ok(())
}

async fn create_story(workflow: &StoryWorkflow) -> Result<()> {
    let defaults = workflow.request_defaults().await;

    let prompt = Text::new("What should the story be about?").prompt()?;
    if prompt.trim().is_empty() {
        println!("Please enter a story prompt.");
        return Ok(());
    }

    let mut enhanced_prompt = None;
    if Confirm::new("Enhance the prompt?").with_default(false).prompt()? {
        let enhanced = workflow.enhance_prompt(&prompt).await;
        println!("\n  {}\n", enhanced);
        if Confirm::new("Use the enhanced prompt?").with_default(true).prompt()? {
            enhanced_prompt = Some(enhanced);
        }
    }

    let character_count = CustomType::<usize>::new("Story length in characters:")
        .with_default(defaults.character_count)
        .with_help_message(&format!("{}-{}", MIN_CHARACTER_COUNT, MAX_CHARACTER_COUNT))
        .prompt()?;
    let illustration_count = CustomType::<usize>::new("Number of illustrations:")
        .with_default(defaults.illustration_count)
        .with_help_message(&format!("{}-{}", MIN_ILLUSTRATION_COUNT, MAX_ILLUSTRATION_COUNT))
        .prompt()?;

    let mut styles = STYLE_TAGS.to_vec();
    let default_style = styles
        .iter()
        .position(|s| *s == defaults.style.tag())
        .unwrap_or(0);
    styles.push("other...");
    let style = match Select::new("Illustration style:", styles)
        .with_starting_cursor(default_style)
        .prompt()?
    {
        "other..." => IllustrationStyle::from_tag(&Text::new("Style name:").prompt()?),
        tag => IllustrationStyle::from_tag(tag),
    };

    let default_age = AgeGroup::ALL
        .iter()
        .position(|a| *a == defaults.age_group)
        .unwrap_or(1);
    let age_group = Select::new("Reader age group:", AgeGroup::ALL.to_vec())
        .with_starting_cursor(default_age)
        .prompt()?;

    let character_name = Text::new("Main character name (leave empty to pick one):").prompt()?;

    let request = StoryRequest {
        prompt,
        enhanced_prompt,
        target_character_count: character_count,
        illustration_count,
        illustration_style: style,
        target_age_group: age_group,
        character_name: Some(character_name),
    };

    let story = workflow.generate(request).await?;
    println!("\n{}\n", story_line(&story));
    println!("{}\n", story.story_text);

    if Confirm::new("Export as PDF now?").with_default(true).prompt()? {
        if let Some(path) = workflow.export_pdf(story.id).await? {
            println!("Saved to {}", path);
        }
    }
    Ok(())
}

async fn list_stories(workflow: &StoryWorkflow) -> Result<()> {
    let stories = workflow.store().recent(RECENT_LIMIT).await?;
    if stories.is_empty() {
        println!("No stories yet.");
    } else {
        println!("Latest {} stories:", stories.len());
    }
    for story in &stories {
        println!("{}", story_line(story));
    }
    Ok(())
}

async fn search_stories(workflow: &StoryWorkflow) -> Result<()> {
    let query = Text::new("Search for:").prompt()?;
    let hits = workflow.store().search(&query).await?;
    println!("{} matching stories", hits.len());
    for story in &hits {
        println!("{}", story_line(story));
    }
    Ok(())
}

async fn choose_story(workflow: &StoryWorkflow, prompt: &str) -> Result<Option<Story>> {
    let stories = workflow.store().get_all().await?;
    if stories.is_empty() {
        println!("No stories yet.");
        return Ok(None);
    }
    let choices: Vec<StoryChoice> = stories
        .iter()
        .map(|s| StoryChoice {
            id: s.id,
            label: story_line(s),
        })
        .collect();
    let choice = Select::new(prompt, choices).prompt()?;
    Ok(stories.into_iter().find(|s| s.id == choice.id))
}

async fn read_story(workflow: &StoryWorkflow) -> Result<()> {
    let Some(story) = choose_story(workflow, "Which story?").await? else {
        return Ok(());
    };
    println!("\n{}\n", story.title);
    println!("{}\n", story.story_text);
    println!("Starring {}: {}", story.character_name, story.character_appearance);
    for illustration in story.illustrations() {
        println!("  {}. {} - {}", illustration.scene_number, illustration.caption, illustration.image_url);
    }
    Ok(())
}

async fn export_story(workflow: &StoryWorkflow) -> Result<()> {
    let Some(story) = choose_story(workflow, "Which story should be exported?").await? else {
        return Ok(());
    };
    if let Some(path) = workflow.export_pdf(story.id).await? {
        println!("Saved to {}", path);
    }
    Ok(())
}

async fn regenerate_illustration(workflow: &StoryWorkflow) -> Result<()> {
    let Some(story) = choose_story(workflow, "Which story?").await? else {
        return Ok(());
    };
    let count = story.image_urls.len();
    if count == 0 {
        println!("This story has no illustrations.");
        return Ok(());
    }

    let number = CustomType::<usize>::new("Illustration number:")
        .with_help_message(&format!("1-{}", count))
        .with_validator(move |n: &usize| {
            if (1..=count).contains(n) {
                Ok(inquire::validator::Validation::Valid)
            } else {
                Ok(inquire::validator::Validation::Invalid(
                    format!("Choose a number between 1 and {}", count).into(),
                ))
            }
        })
        .prompt()?;

    if let Some(updated) = workflow.regenerate_illustration(story.id, number - 1).await? {
        println!("New illustration: {}", updated.image_urls[number - 1]);
    }
    Ok(())
}

async fn delete_story(workflow: &StoryWorkflow) -> Result<()> {
    let Some(story) = choose_story(workflow, "Which story should be deleted?").await? else {
        return Ok(());
    };
    let confirmed = Confirm::new(&format!("Delete \"{}\"? This cannot be undone.", story.title))
        .with_default(false)
        .prompt()?;
    if !confirmed {
        return Ok(());
    }
    if workflow.store().delete(story.id).await? {
        println!("Deleted.");
    } else {
        println!("Story {} no longer exists.", story.id);
    }
    Ok(())
}

async fn manage_api_keys(workflow: &StoryWorkflow) -> Result<()> {
    let settings = workflow.settings();
    for provider in PROVIDERS {
        let state = if settings.get_api_key(provider).await.is_empty() {
            "not set"
        } else {
            "saved"
        };
        println!("  {}: {}", provider, state);
    }

    let preferences = settings.preferences().await;
    println!(
        "  default provider: {}, default style: {}",
        preferences.default_llm_provider,
        preferences
            .default_style
            .as_ref()
            .map(|s| s.tag().to_string())
            .unwrap_or_else(|| "from config".to_string())
    );

    let mut options: Vec<String> = PROVIDERS.iter().map(|p| format!("Set {} key", p)).collect();
    options.push(EDIT_PREFERENCES.to_string());
    options.push(CLEAR_KEYS.to_string());
    let choice = Select::new("API keys:", options).prompt()?;

    if choice == EDIT_PREFERENCES {
        return edit_preferences(workflow, preferences).await;
    }
    if choice == CLEAR_KEYS {
        if Confirm::new("Remove every saved key?").with_default(false).prompt()? {
            settings.clear_api_keys().await?;
            println!("All keys cleared.");
        }
        return Ok(());
    }

    let Some(provider) = PROVIDERS.iter().find(|p| choice.ends_with(&format!(" {} key", p))) else {
        return Ok(());
    };
    let key = Password::new(&format!("{} API key:", provider))
        .without_confirmation()
        .prompt()?;
    match validate_api_key(provider, &key) {
        Ok(()) => {
            settings.save_api_key(provider, &key).await?;
            println!("Saved. It will be used the next time StoryBook starts.");
        }
        Err(e) => println!("{}", e),
    }
    Ok(())
}

async fn edit_preferences(workflow: &StoryWorkflow, current: Preferences) -> Result<()> {
    let provider_cursor = PROVIDERS
        .iter()
        .position(|p| *p == current.default_llm_provider)
        .unwrap_or(0);
    let provider = Select::new("Default provider:", PROVIDERS.to_vec())
        .with_starting_cursor(provider_cursor)
        .prompt()?;

    let mut styles = vec!["from config"];
    styles.extend(STYLE_TAGS);
    let style_cursor = current
        .default_style
        .as_ref()
        .and_then(|style| styles.iter().position(|s| *s == style.tag()))
        .unwrap_or(0);
    let style = match Select::new("Default illustration style:", styles)
        .with_starting_cursor(style_cursor)
        .prompt()?
    {
        "from config" => None,
        tag => Some(IllustrationStyle::from_tag(tag)),
    };

    workflow
        .settings()
        .save_preferences(Preferences {
            default_llm_provider: provider.to_string(),
            default_style: style,
        })
        .await?;
    println!("Preferences saved.");
    Ok(())
}

async fn enhancer_health(workflow: &StoryWorkflow) -> Result<()> {
    let health = workflow.enhancer().health().await;
    println!(
        "State: {:?}{}\nSample: {}",
        health.state,
        if health.using_fallback { " (template fallback)" } else { "" },
        health.sample
    );
    if health.using_fallback && Confirm::new("Retry the enhancer?").with_default(false).prompt()? {
        workflow.enhancer().reset().await;
        let health = workflow.enhancer().health().await;
        println!("State: {:?}", health.state);
    }
    Ok(())
}
