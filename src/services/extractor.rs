//! Keyword-based feature extraction from free text.
//!
//! Each category maps keywords to a canonical tag. Matching is plain substring
//! containment against the lowercased text padded with one space on each side,
//! so a keyword written as `" cat"` only matches at a word start.

use crate::core::models::FeatureSet;

pub const DEFAULT_CHARACTER: &str = "little friend";
pub const DEFAULT_SETTING: &str = "magical land";
pub const DEFAULT_MOOD: &str = "cheerful";
pub const DEFAULT_ACTION: &str = "playing";
pub const DEFAULT_THEME: &str = "friendship";
pub const DEFAULT_GOAL: &str = "general";

type Vocabulary = &'static [(&'static str, &'static str)];

const CHARACTERS: Vocabulary = &[
    ("bunny", "rabbit"),
    ("rabbit", "rabbit"),
    ("puppy", "dog"),
    (" dog", "dog"),
    ("kitten", "cat"),
    ("kitty", "cat"),
    (" cat ", "cat"),
    (" cats ", "cat"),
    ("dragon", "dragon"),
    (" bear", "bear"),
    ("teddy", "bear"),
    (" fox", "fox"),
    (" owl", "owl"),
    ("unicorn", "unicorn"),
    ("princess", "princess"),
    ("prince ", "prince"),
    ("knight", "knight"),
    ("robot", "robot"),
    ("fairy", "fairy"),
    ("fairies", "fairy"),
    ("dinosaur", "dinosaur"),
    (" mouse", "mouse"),
    (" mice", "mouse"),
    ("elephant", "elephant"),
    ("turtle", "turtle"),
    ("penguin", "penguin"),
    ("pirate", "pirate"),
    ("wizard", "wizard"),
    ("witch", "wizard"),
    (" girl", "girl"),
    (" boy ", "boy"),
];

const SETTINGS: Vocabulary = &[
    ("forest", "woodland"),
    ("woods", "woodland"),
    ("jungle", "jungle"),
    ("castle", "castle"),
    ("palace", "castle"),
    ("kingdom", "castle"),
    ("ocean", "ocean"),
    (" sea ", "ocean"),
    ("underwater", "ocean"),
    ("beach", "beach"),
    ("space", "outer space"),
    ("planet", "outer space"),
    (" moon", "outer space"),
    (" stars", "outer space"),
    ("mountain", "mountains"),
    ("garden", "garden"),
    ("meadow", "meadow"),
    (" farm", "farm"),
    (" city", "town"),
    (" town", "town"),
    ("village", "town"),
    ("school", "school"),
    ("desert", "desert"),
    ("snow", "snowy land"),
    ("arctic", "snowy land"),
    (" sky", "sky"),
    ("cloud", "sky"),
    (" cave", "cave"),
    ("home ", "home"),
    ("house", "home"),
];

/// Checked in order; the first mood with any hit wins.
const MOODS: &[(&str, &[&str])] = &[
    ("mysterious", &["mystery", "secret", "hidden", "spooky", "shadow"]),
    ("adventurous", &["adventure", "brave", "quest", "explore", "discover", "journey"]),
    ("magical", &["magic", "enchanted", "spell", "wish"]),
    ("funny", &["silly", "funny", "giggle", "laugh", "joke"]),
    ("calm", &["sleep", "bedtime", "quiet", "gentle", "dream", "cozy"]),
];

const ACTIONS: Vocabulary = &[
    ("discover", "exploring"),
    ("explore", "exploring"),
    (" fly", "flying"),
    ("flies", "flying"),
    ("swim", "swimming"),
    (" play", "playing"),
    (" find", "searching"),
    ("search", "searching"),
    ("looking for", "searching"),
    (" help", "helping"),
    ("rescue", "helping"),
    ("save ", "helping"),
    ("dance", "dancing"),
    (" sing", "singing"),
    ("build", "building"),
    (" run", "running"),
    (" race", "running"),
    ("climb", "climbing"),
    ("sleep", "sleeping"),
    (" learn", "learning"),
];

const THEMES: Vocabulary = &[
    ("friend", "friendship"),
    ("brave", "courage"),
    ("courage", "courage"),
    ("fear", "courage"),
    (" kind", "kindness"),
    ("share", "kindness"),
    (" help", "kindness"),
    ("family", "family"),
    (" mom", "family"),
    (" dad", "family"),
    ("grandma", "family"),
    ("grandpa", "family"),
    (" learn", "learning"),
    ("discover", "curiosity"),
    ("curious", "curiosity"),
    ("nature", "nature"),
    (" tree", "nature"),
    ("teamwork", "teamwork"),
    ("together", "teamwork"),
    ("honest", "honesty"),
    ("truth", "honesty"),
];

const USER_GOALS: Vocabulary = &[
    ("bedtime", "bedtime"),
    ("sleep", "bedtime"),
    (" learn", "educational"),
    ("teach", "educational"),
    ("lesson", "educational"),
    ("count", "educational"),
    ("alphabet", "educational"),
    ("laugh", "entertainment"),
    ("funny", "entertainment"),
    ("silly", "entertainment"),
    ("afraid", "overcoming fears"),
    ("scared", "overcoming fears"),
    ("fear", "overcoming fears"),
    ("birthday", "celebration"),
    ("holiday", "celebration"),
    ("new baby", "life changes"),
    ("moving", "life changes"),
    ("first day", "life changes"),
];

/// Extracts features from a single piece of text.
pub fn extract(text: &str) -> FeatureSet {
    let haystack = format!(" {} ", text.to_lowercase());

    FeatureSet {
        characters: collect_tags(&haystack, CHARACTERS, DEFAULT_CHARACTER),
        settings: collect_tags(&haystack, SETTINGS, DEFAULT_SETTING),
        mood: resolve_mood(&haystack),
        actions: collect_tags(&haystack, ACTIONS, DEFAULT_ACTION),
        themes: collect_tags(&haystack, THEMES, DEFAULT_THEME),
        user_goals: collect_tags(&haystack, USER_GOALS, DEFAULT_GOAL),
    }
}

/// Extracts features from every available source (prompt, enhanced prompt, body).
pub fn extract_sources(sources: &[Option<&str>]) -> FeatureSet {
    let combined = sources
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    extract(&combined)
}

/// Tags ordered by where their earliest keyword occurs in the text.
fn collect_tags(haystack: &str, vocabulary: Vocabulary, default: &str) -> Vec<String> {
    let mut hits: Vec<(usize, usize, &str)> = vocabulary
        .iter()
        .enumerate()
        .filter_map(|(rank, (keyword, tag))| haystack.find(keyword).map(|pos| (pos, rank, *tag)))
        .collect();
    hits.sort();

    let mut tags: Vec<String> = Vec::new();
    for (_, _, tag) in hits {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    if tags.is_empty() {
        tags.push(default.to_string());
    }
    tags
}

fn resolve_mood(haystack: &str) -> String {
    MOODS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(mood, _)| mood.to_string())
        .unwrap_or_else(|| DEFAULT_MOOD.to_string())
}
