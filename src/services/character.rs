use rand::seq::IndexedRandom;
use rand::Rng;

use crate::core::models::{AgeGroup, CharacterProfile, FeatureSet};

const GENERIC_NAMES: &[&str] = &["Sunny", "Pip", "Milo", "Luna", "Rosie", "Finn"];

const NAME_BANKS: &[(&str, &[&str])] = &[
    ("rabbit", &["Benny", "Clover", "Hopscotch", "Thistle"]),
    ("dog", &["Biscuit", "Max", "Rusty", "Pepper"]),
    ("cat", &["Whiskers", "Mittens", "Ginger", "Shadow"]),
    ("dragon", &["Ember", "Sparky", "Puff", "Cinder"]),
    ("bear", &["Bruno", "Honey", "Barnaby", "Teddy"]),
    ("fox", &["Rusty", "Fern", "Scout", "Juniper"]),
    ("owl", &["Hoot", "Olive", "Professor Feathers"]),
    ("unicorn", &["Stardust", "Twinkle", "Aurora"]),
    ("princess", &["Isabella", "Aria", "Rose"]),
    ("prince", &["Leo", "Oliver", "Arthur"]),
    ("knight", &["Sir Cedric", "Dame Gwen", "Sir Percy"]),
    ("robot", &["Bolt", "Gizmo", "Beep"]),
    ("fairy", &["Tinkle", "Willow", "Dewdrop"]),
    ("dinosaur", &["Rex", "Dotty", "Stompy"]),
    ("mouse", &["Squeak", "Nibbles", "Pip"]),
    ("elephant", &["Peanut", "Ellie", "Jumbo"]),
    ("turtle", &["Shelly", "Tuck", "Sage"]),
    ("penguin", &["Waddles", "Pebble", "Flipper"]),
    ("pirate", &["Captain Kit", "Salty Sam", "Pearl"]),
    ("wizard", &["Merla", "Alaric", "Zephyr"]),
    ("girl", &["Maya", "Zoe", "Lily"]),
    ("boy", &["Sam", "Theo", "Jamie"]),
];

const APPEARANCES: &[(&str, &str)] = &[
    ("rabbit", "a small rabbit with soft brown fur, long floppy ears and a fluffy white tail"),
    ("dog", "a playful puppy with golden fur, a wagging tail and a red collar"),
    ("cat", "a curious kitten with orange stripes, bright green eyes and tiny white paws"),
    ("dragon", "a friendly little dragon with shiny green scales and small purple wings"),
    ("bear", "a cuddly brown bear with a round belly and a cheerful smile"),
    ("fox", "a clever red fox with a bushy white-tipped tail"),
    ("owl", "a wise little owl with big round glasses and speckled feathers"),
    ("unicorn", "a gentle white unicorn with a rainbow mane and a golden horn"),
    ("princess", "a young princess in a sparkly blue dress and a tiny silver crown"),
    ("prince", "a young prince with a green cape and a golden crown"),
    ("knight", "a small knight in shiny armor with a feathered helmet"),
    ("robot", "a round silver robot with blinking blue lights and wheels for feet"),
    ("fairy", "a tiny fairy with shimmering wings and a flower-petal dress"),
    ("dinosaur", "a small green dinosaur with friendly eyes and bumpy spikes"),
    ("mouse", "a tiny grey mouse with big round ears and a pink nose"),
    ("elephant", "a baby elephant with big floppy ears and a curly trunk"),
    ("turtle", "a slow and steady turtle with a patterned green shell"),
    ("penguin", "a little penguin with a black-and-white coat and a yellow scarf"),
    ("pirate", "a young pirate with a striped shirt, a red bandana and a toy spyglass"),
    ("wizard", "a young wizard with a starry purple hat and a glowing wand"),
    ("girl", "a young girl with curly hair, a yellow raincoat and red boots"),
    ("boy", "a young boy with messy hair, a blue hoodie and muddy sneakers"),
];

const GENERIC_APPEARANCE: &str = "a friendly character with a warm smile and bright, curious eyes";

const BASE_TRAITS: &[&str] = &["kind", "curious", "brave", "caring"];

fn age_traits(age_group: AgeGroup) -> &'static [&'static str] {
    match age_group {
        AgeGroup::Toddler => &["gentle", "playful", "cuddly"],
        AgeGroup::Preschool => &["imaginative", "cheerful", "helpful"],
        AgeGroup::EarlyReader => &["adventurous", "clever", "determined"],
        AgeGroup::MiddleGrade => &["resourceful", "thoughtful", "courageous"],
    }
}

/// Builds the main character for a story.
///
/// A supplied name is used as-is. Otherwise the name is drawn from the bank of the
/// primary archetype using `rng`; appearance and personality are deterministic.
pub fn synthesize<R: Rng + ?Sized>(
    features: &FeatureSet,
    supplied_name: Option<&str>,
    age_group: AgeGroup,
    rng: &mut R,
) -> CharacterProfile {
    let archetype = features.primary_character();

    let main_character = match supplied_name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => pick_name(archetype, rng),
    };

    CharacterProfile {
        appearance: appearance_for(archetype).to_string(),
        personality: personality_for(&main_character, age_group),
        main_character,
    }
}

fn pick_name<R: Rng + ?Sized>(archetype: &str, rng: &mut R) -> String {
    let bank = NAME_BANKS
        .iter()
        .find(|(tag, _)| *tag == archetype)
        .map(|(_, names)| *names)
        .unwrap_or(GENERIC_NAMES);

    bank.choose(rng).copied().unwrap_or(GENERIC_NAMES[0]).to_string()
}

pub fn appearance_for(archetype: &str) -> &'static str {
    APPEARANCES
        .iter()
        .find(|(tag, _)| *tag == archetype)
        .map(|(_, appearance)| *appearance)
        .unwrap_or(GENERIC_APPEARANCE)
}

fn personality_for(name: &str, age_group: AgeGroup) -> String {
    let blended: Vec<&str> = age_traits(age_group)
        .iter()
        .zip(BASE_TRAITS.iter())
        .flat_map(|(age, base)| [*age, *base])
        .take(3)
        .collect();

    format!(
        "{} is {}, {} and {}, a perfect friend for readers aged {}.",
        name,
        blended[0],
        blended[1],
        blended[2],
        age_group.label()
    )
}
