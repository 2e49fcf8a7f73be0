//! Scene planning: turns a feature set and character profile into an ordered
//! list of illustration descriptors.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::models::{
    AgeGroup, CharacterProfile, FeatureSet, IllustrationStyle, SceneContext, SceneDescriptor,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// (description, caption) pairs with {character}, {setting}, {action}, {mood} and {theme} slots.
type SceneBank = &'static [(&'static str, &'static str)];

fn bank_for(age_group: AgeGroup) -> SceneBank {
    match age_group {
        AgeGroup::Toddler => &[
            ("{character} waves hello in the {setting}", "Hello, {character}!"),
            ("{character} is {action} with a soft, {mood} smile", "Look at {character} go!"),
            ("{character} finds a bright red ball in the {setting}", "A ball!"),
            ("{character} shares a big hug with a friend", "Hugs for everyone"),
            ("{character} yawns and snuggles up in the {setting}", "Time to rest"),
        ],
        AgeGroup::Preschool => &[
            ("{character} wakes up in the {setting} feeling {mood}", "A new day begins"),
            ("{character} goes {action} and spots something surprising", "What could it be?"),
            ("{character} meets a new friend in the {setting}", "A new friend"),
            ("{character} and friends go {action} together", "Better together"),
            ("{character} helps a friend and learns about {theme}", "A lesson in {theme}"),
            ("{character} celebrates with everyone in the {setting}", "Hooray!"),
        ],
        AgeGroup::EarlyReader => &[
            ("{character} discovers a mysterious map at the edge of the {setting}", "The map"),
            ("{character} sets out {action} through the {setting}", "The journey begins"),
            ("{character} faces a tricky puzzle, looking {mood} but determined", "The puzzle"),
            ("{character} teams up with an unlikely friend", "An unlikely team"),
            ("{character} solves the mystery with a burst of {theme}", "Solved!"),
            ("{character} heads home under a glowing sky", "Home again"),
        ],
        AgeGroup::MiddleGrade => &[
            ("{character} stands at the threshold of the {setting}, the air {mood} and strange", "The threshold"),
            ("{character} is {action} deeper into the unknown, map in hand", "Into the unknown"),
            ("{character} uncovers a clue that changes everything", "The clue"),
            ("{character} argues, then reconciles, with a loyal companion", "Trust"),
            ("{character} confronts the greatest challenge of the {setting}", "The challenge"),
            ("{character} makes a choice rooted in {theme}", "The choice"),
            ("{character} looks back on the journey, older and wiser", "Reflection"),
        ],
    }
}

pub fn bank_len(age_group: AgeGroup) -> usize {
    bank_for(age_group).len()
}

pub struct SceneSequencer {
    clock: Arc<dyn Clock>,
    calls: AtomicU64,
}

impl Default for SceneSequencer {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SceneSequencer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            calls: AtomicU64::new(0),
        }
    }

    /// Plans exactly `count` scenes, cycling through the age band's template bank.
    pub fn sequence(
        &self,
        features: &FeatureSet,
        count: usize,
        style: &IllustrationStyle,
        age_group: AgeGroup,
        profile: &CharacterProfile,
    ) -> Vec<SceneDescriptor> {
        let bank = bank_for(age_group);
        let stamp = format!(
            "{}-{}",
            self.clock.now().timestamp_millis(),
            self.calls.fetch_add(1, Ordering::Relaxed)
        );

        (0..count)
            .map(|i| self.scene_at(features, bank, i, style, age_group, profile, &stamp))
            .collect()
    }

    /// A single scene, as used when regenerating one illustration of a stored story.
    pub fn scene(
        &self,
        features: &FeatureSet,
        index: usize,
        style: &IllustrationStyle,
        age_group: AgeGroup,
        profile: &CharacterProfile,
    ) -> SceneDescriptor {
        let stamp = format!(
            "{}-{}-regenerated",
            self.clock.now().timestamp_millis(),
            self.calls.fetch_add(1, Ordering::Relaxed)
        );
        self.scene_at(features, bank_for(age_group), index, style, age_group, profile, &stamp)
    }

    #[allow(clippy::too_many_arguments)]
    fn scene_at(
        &self,
        features: &FeatureSet,
        bank: SceneBank,
        index: usize,
        style: &IllustrationStyle,
        age_group: AgeGroup,
        profile: &CharacterProfile,
        stamp: &str,
    ) -> SceneDescriptor {
        let slot = index % bank.len();
        let (description_template, caption_template) = bank[slot];
        let archetype = features.primary_character();

        let context = SceneContext {
            character: archetype.to_string(),
            setting: pick(&features.settings, slot),
            action: pick(&features.actions, slot),
            mood: features.mood.clone(),
            theme: pick(&features.themes, slot),
        };

        let character = display_character(&profile.main_character, archetype);
        let description = fill(description_template, &character, &context);
        let caption = fill(caption_template, &profile.main_character, &context);

        let illustration_prompt = format!(
            "A {} children's book illustration for ages {}: {}. \
             Main character: {}, {}. Mood: {}. Theme: {}. \
             Keep the character's look consistent across every scene; soft colors, no text.",
            style.tag(),
            age_group.label(),
            description,
            profile.main_character,
            profile.appearance,
            context.mood,
            context.theme,
        );

        let seed = slugify(&format!(
            "{}-{}-{}-{}-{}",
            profile.main_character,
            context.setting,
            index,
            style.tag(),
            stamp
        ));

        SceneDescriptor {
            scene_number: index + 1,
            description,
            illustration_prompt,
            caption,
            seed,
            context_tags: context,
        }
    }
}

fn pick(tags: &[String], slot: usize) -> String {
    if tags.is_empty() {
        return String::new();
    }
    tags[slot % tags.len()].clone()
}

fn display_character(name: &str, archetype: &str) -> String {
    if archetype.is_empty() || name.to_lowercase().contains(archetype) {
        name.to_string()
    } else {
        format!("{} the {}", name, archetype)
    }
}

fn fill(template: &str, character: &str, context: &SceneContext) -> String {
    template
        .replace("{character}", character)
        .replace("{setting}", &context.setting)
        .replace("{action}", &context.action)
        .replace("{mood}", &context.mood)
        .replace("{theme}", &context.theme)
}

fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
