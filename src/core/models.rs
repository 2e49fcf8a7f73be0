use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MIN_CHARACTER_COUNT: usize = 500;
pub const MAX_CHARACTER_COUNT: usize = 1500;
pub const DEFAULT_CHARACTER_COUNT: usize = 800;

pub const MIN_ILLUSTRATION_COUNT: usize = 5;
pub const MAX_ILLUSTRATION_COUNT: usize = 15;
pub const DEFAULT_ILLUSTRATION_COUNT: usize = 10;

/// Audience age band. Drives template and vocabulary selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum AgeGroup {
    Toddler,
    #[default]
    Preschool,
    EarlyReader,
    MiddleGrade,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 4] = [
        AgeGroup::Toddler,
        AgeGroup::Preschool,
        AgeGroup::EarlyReader,
        AgeGroup::MiddleGrade,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::Toddler => "1-2",
            AgeGroup::Preschool => "3-5",
            AgeGroup::EarlyReader => "6-8",
            AgeGroup::MiddleGrade => "9-12",
        }
    }

    /// Unknown labels resolve to the youngest band.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "3-5" => AgeGroup::Preschool,
            "6-8" => AgeGroup::EarlyReader,
            "9-12" => AgeGroup::MiddleGrade,
            _ => AgeGroup::Toddler,
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for AgeGroup {
    fn from(value: String) -> Self {
        AgeGroup::from_label(&value)
    }
}

impl From<AgeGroup> for String {
    fn from(value: AgeGroup) -> Self {
        value.label().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum IllustrationStyle {
    #[default]
    Watercolor,
    Sketch,
    Digital,
    Cartoon,
    Other(String),
}

impl IllustrationStyle {
    pub fn tag(&self) -> &str {
        match self {
            IllustrationStyle::Watercolor => "watercolor",
            IllustrationStyle::Sketch => "sketch",
            IllustrationStyle::Digital => "digital",
            IllustrationStyle::Cartoon => "cartoon",
            IllustrationStyle::Other(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        match tag.as_str() {
            "watercolor" => IllustrationStyle::Watercolor,
            "sketch" => IllustrationStyle::Sketch,
            "digital" | "digital art" => IllustrationStyle::Digital,
            "cartoon" => IllustrationStyle::Cartoon,
            "" => IllustrationStyle::default(),
            _ => IllustrationStyle::Other(tag),
        }
    }
}

impl fmt::Display for IllustrationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<String> for IllustrationStyle {
    fn from(value: String) -> Self {
        IllustrationStyle::from_tag(&value)
    }
}

impl From<IllustrationStyle> for String {
    fn from(value: IllustrationStyle) -> Self {
        value.tag().to_string()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Please enter a story prompt")]
    EmptyPrompt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRequest {
    pub prompt: String,
    #[serde(default)]
    pub enhanced_prompt: Option<String>,
    #[serde(default)]
    pub target_character_count: usize,
    #[serde(default)]
    pub illustration_count: usize,
    #[serde(default)]
    pub illustration_style: IllustrationStyle,
    #[serde(default)]
    pub target_age_group: AgeGroup,
    #[serde(default)]
    pub character_name: Option<String>,
}

impl StoryRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            enhanced_prompt: None,
            target_character_count: DEFAULT_CHARACTER_COUNT,
            illustration_count: DEFAULT_ILLUSTRATION_COUNT,
            illustration_style: IllustrationStyle::default(),
            target_age_group: AgeGroup::default(),
            character_name: None,
        }
    }

    /// The enhanced prompt wins whenever it carries any text.
    pub fn final_prompt(&self) -> &str {
        match self.enhanced_prompt.as_deref() {
            Some(enhanced) if !enhanced.trim().is_empty() => enhanced,
            _ => &self.prompt,
        }
    }

    /// Clamps counts into their supported ranges; zero means "use the default".
    pub fn normalized(mut self) -> Self {
        self.target_character_count = match self.target_character_count {
            0 => DEFAULT_CHARACTER_COUNT,
            n => n.clamp(MIN_CHARACTER_COUNT, MAX_CHARACTER_COUNT),
        };
        self.illustration_count = match self.illustration_count {
            0 => DEFAULT_ILLUSTRATION_COUNT,
            n => n.clamp(MIN_ILLUSTRATION_COUNT, MAX_ILLUSTRATION_COUNT),
        };
        self.character_name = self
            .character_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.final_prompt().trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        Ok(())
    }
}

/// A form field value as it arrives from the presentation layer: either the raw
/// value or a change event wrapping it. Resolved once before reaching the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue<T> {
    ChangeEvent { target: EventTarget<T> },
    RawValue(T),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTarget<T> {
    pub value: T,
}

impl<T> FormValue<T> {
    pub fn resolve(self) -> T {
        match self {
            FormValue::RawValue(value) => value,
            FormValue::ChangeEvent { target } => target.value,
        }
    }
}

impl<T> From<T> for FormValue<T> {
    fn from(value: T) -> Self {
        FormValue::RawValue(value)
    }
}

/// Request as submitted by a form or a request file.
#[derive(Debug, Clone, Deserialize)]
pub struct StoryForm {
    pub prompt: FormValue<String>,
    #[serde(default)]
    pub enhanced_prompt: Option<FormValue<String>>,
    #[serde(default)]
    pub character_count: Option<FormValue<usize>>,
    #[serde(default)]
    pub illustration_count: Option<FormValue<usize>>,
    #[serde(default)]
    pub illustration_style: Option<FormValue<String>>,
    #[serde(default)]
    pub age_group: Option<FormValue<String>>,
    #[serde(default)]
    pub character_name: Option<FormValue<String>>,
}

impl StoryForm {
    pub fn into_request(self) -> StoryRequest {
        StoryRequest {
            prompt: self.prompt.resolve(),
            enhanced_prompt: self.enhanced_prompt.map(FormValue::resolve),
            target_character_count: self.character_count.map(FormValue::resolve).unwrap_or(0),
            illustration_count: self.illustration_count.map(FormValue::resolve).unwrap_or(0),
            illustration_style: self
                .illustration_style
                .map(|s| IllustrationStyle::from_tag(&s.resolve()))
                .unwrap_or_default(),
            target_age_group: self
                .age_group
                .map(|a| AgeGroup::from_label(&a.resolve()))
                .unwrap_or_default(),
            character_name: self.character_name.map(FormValue::resolve),
        }
        .normalized()
    }
}

/// Normalized tags extracted from free text. Every collection is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub characters: Vec<String>,
    pub settings: Vec<String>,
    pub mood: String,
    pub actions: Vec<String>,
    pub themes: Vec<String>,
    pub user_goals: Vec<String>,
}

impl FeatureSet {
    pub fn primary_character(&self) -> &str {
        self.characters.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub main_character: String,
    pub appearance: String,
    pub personality: String,
}

/// The slice of the feature set a scene was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneContext {
    pub character: String,
    pub setting: String,
    pub action: String,
    pub mood: String,
    pub theme: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub scene_number: usize,
    pub description: String,
    pub illustration_prompt: String,
    pub caption: String,
    pub seed: String,
    pub context_tags: SceneContext,
}

/// A scene descriptor with its resolved image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Illustration {
    pub scene_number: usize,
    pub description: String,
    pub illustration_prompt: String,
    pub image_url: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: u64,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub title: String,
    pub story_text: String,
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub scene_captions: Vec<String>,
    pub llm_used: String,
    pub character_count: usize,
    pub illustration_count: usize,
    pub illustration_style: IllustrationStyle,
    pub target_age_group: AgeGroup,
    pub character_name: String,
    pub character_appearance: String,
    pub character_personality: String,
    pub created_at: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

impl Story {
    pub fn character_profile(&self) -> CharacterProfile {
        CharacterProfile {
            main_character: self.character_name.clone(),
            appearance: self.character_appearance.clone(),
            personality: self.character_personality.clone(),
        }
    }

    /// Pairs stored image references with their captions for rendering.
    pub fn illustrations(&self) -> Vec<Illustration> {
        self.image_urls
            .iter()
            .enumerate()
            .map(|(i, url)| Illustration {
                scene_number: i + 1,
                description: String::new(),
                illustration_prompt: String::new(),
                image_url: url.clone(),
                caption: self
                    .scene_captions
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Illustration {}", i + 1)),
            })
            .collect()
    }
}

/// A story that has not been assigned an id or creation time yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStory {
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub title: String,
    pub story_text: String,
    pub image_urls: Vec<String>,
    pub scene_captions: Vec<String>,
    pub llm_used: String,
    pub character_count: usize,
    pub illustration_count: usize,
    pub illustration_style: IllustrationStyle,
    pub target_age_group: AgeGroup,
    pub character: CharacterProfile,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryPatch {
    pub title: Option<String>,
    pub story_text: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub scene_captions: Option<Vec<String>>,
    pub pdf_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_prompt_prefers_non_blank_enhancement() {
        let mut request = StoryRequest::new("a cat");
        assert_eq!(request.final_prompt(), "a cat");

        request.enhanced_prompt = Some("   ".to_string());
        assert_eq!(request.final_prompt(), "a cat");

        request.enhanced_prompt = Some("a clever cat on a boat".to_string());
        assert_eq!(request.final_prompt(), "a clever cat on a boat");
    }

    #[test]
    fn test_normalized_clamps_counts() {
        let mut request = StoryRequest::new("x");
        request.target_character_count = 5000;
        request.illustration_count = 1;
        let request = request.normalized();
        assert_eq!(request.target_character_count, MAX_CHARACTER_COUNT);
        assert_eq!(request.illustration_count, MIN_ILLUSTRATION_COUNT);

        let mut request = StoryRequest::new("x");
        request.target_character_count = 0;
        request.illustration_count = 0;
        request.character_name = Some("  ".to_string());
        let request = request.normalized();
        assert_eq!(request.target_character_count, DEFAULT_CHARACTER_COUNT);
        assert_eq!(request.illustration_count, DEFAULT_ILLUSTRATION_COUNT);
        assert_eq!(request.character_name, None);
    }

    #[test]
    fn test_validate_rejects_blank_prompt() {
        assert_eq!(StoryRequest::new("  ").validate(), Err(RequestError::EmptyPrompt));
        assert!(StoryRequest::new("a dragon").validate().is_ok());
    }

    #[test]
    fn test_unknown_age_label_falls_back_to_youngest() {
        assert_eq!(AgeGroup::from_label("6-8"), AgeGroup::EarlyReader);
        assert_eq!(AgeGroup::from_label("teen"), AgeGroup::Toddler);
    }

    #[test]
    fn test_style_round_trips_through_serde() {
        let json = serde_json::to_string(&IllustrationStyle::Other("pixel".into())).unwrap();
        assert_eq!(json, "\"pixel\"");
        let style: IllustrationStyle = serde_json::from_str("\"Sketch\"").unwrap();
        assert_eq!(style, IllustrationStyle::Sketch);
    }

    #[test]
    fn test_story_form_accepts_raw_values_and_change_events() {
        let yaml = r#"
prompt:
  target:
    value: "A brave bunny"
character_count: 2000
illustration_count:
  target:
    value: 6
illustration_style: sketch
age_group: "6-8"
"#;
        let form: StoryForm = serde_yaml_ng::from_str(yaml).unwrap();
        let request = form.into_request();
        assert_eq!(request.prompt, "A brave bunny");
        assert_eq!(request.target_character_count, MAX_CHARACTER_COUNT);
        assert_eq!(request.illustration_count, 6);
        assert_eq!(request.illustration_style, IllustrationStyle::Sketch);
        assert_eq!(request.target_age_group, AgeGroup::EarlyReader);
    }

    #[test]
    fn test_story_illustrations_pair_captions() {
        let story = Story {
            id: 1,
            prompt: "p".into(),
            enhanced_prompt: None,
            title: "t".into(),
            story_text: "s".into(),
            image_urls: vec!["a".into(), "b".into()],
            scene_captions: vec!["first".into()],
            llm_used: "mock".into(),
            character_count: 1,
            illustration_count: 2,
            illustration_style: IllustrationStyle::Sketch,
            target_age_group: AgeGroup::Preschool,
            character_name: "Pip".into(),
            character_appearance: "small".into(),
            character_personality: "kind".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            pdf_url: None,
        };
        let illustrations = story.illustrations();
        assert_eq!(illustrations[0].caption, "first");
        assert_eq!(illustrations[1].caption, "Illustration 2");
        assert_eq!(illustrations[1].image_url, "b");
    }
}
