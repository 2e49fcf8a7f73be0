use crate::core::models::{AgeGroup, CharacterProfile};

const DEFAULT_TITLE: &str = "My Magical Story";

fn template_for(age_group: AgeGroup) -> &'static str {
    match age_group {
        AgeGroup::Toddler => {
            "Here is {name}. {name} loves {prompt}.\n\n\
             {name} looks up. {name} looks down. What does {name} see?\n\n\
             A big hug, a soft blanket and a happy smile.\n\n\
             Night night, {name}. Sweet dreams."
        }
        AgeGroup::Preschool => {
            "Once upon a time, there was a magical adventure that began with {prompt}.\n\n\
             {name} lived in a wonderful land where anything was possible. Every morning brought a new surprise.\n\n\
             One day {name} set off on a journey filled with friendship, discovery and wonder.\n\n\
             Along the way {name} learned that kindness and courage can make any day brighter.\n\n\
             And {name} lived happily ever after, with a heart full of joy."
        }
        AgeGroup::EarlyReader => {
            "Nobody expected the day to start with {prompt}, least of all {name}.\n\n\
             {name} packed a backpack with a map, a flashlight and a peanut butter sandwich, just in case.\n\n\
             The path twisted and turned, and twice {name} almost gave up. But every puzzle had an answer for someone who kept looking.\n\n\
             By sunset {name} had made a new friend and solved a mystery nobody else had noticed.\n\n\
             Walking home, {name} smiled. Tomorrow would bring another adventure."
        }
        AgeGroup::MiddleGrade => {
            "It began, as the best stories do, with something small: {prompt}.\n\n\
             {name} had always suspected the world was bigger than it looked, and now there was proof.\n\n\
             The challenge ahead was not just about being brave. It meant listening, planning and trusting friends when it mattered most.\n\n\
             When the hardest moment came, {name} chose to help someone else first, and that choice changed everything.\n\n\
             Looking back, {name} understood that courage is a decision made one step at a time."
        }
    }
}

fn filler_for(age_group: AgeGroup) -> &'static str {
    match age_group {
        AgeGroup::Toddler => " Clap, clap, hooray! What a happy day.",
        AgeGroup::Preschool => {
            " The adventure continued with even more exciting discoveries and heartwarming moments that brought everyone closer together."
        }
        AgeGroup::EarlyReader => {
            " Each new clue led somewhere unexpected, and every friend along the way added something important to the journey."
        }
        AgeGroup::MiddleGrade => {
            " Every decision carried weight, and with each one the story grew richer, stranger and more worth telling."
        }
    }
}

/// Renders the age-band template and pads or truncates it to exactly
/// `target_character_count` characters.
pub fn compose(
    final_prompt: &str,
    target_character_count: usize,
    age_group: AgeGroup,
    profile: &CharacterProfile,
) -> String {
    let base = template_for(age_group)
        .replace("{name}", &profile.main_character)
        .replace("{prompt}", &prompt_fragment(final_prompt));

    let base_len = base.chars().count();
    let mut story = base;

    if base_len < target_character_count {
        let filler = filler_for(age_group);
        let filler_len = filler.chars().count();
        let repeats = (target_character_count - base_len).div_ceil(filler_len);
        story.push_str(&filler.repeat(repeats));
    }

    story.chars().take(target_character_count).collect()
}

/// Title built from the first four words of the prompt.
pub fn compose_title(prompt: &str) -> String {
    let key_words = prompt.split_whitespace().take(4).collect::<Vec<_>>().join(" ");
    if key_words.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        format!("The Story of {}", key_words)
    }
}

fn prompt_fragment(prompt: &str) -> String {
    let fragment = prompt
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    if fragment.is_empty() {
        "a little bit of magic".to_string()
    } else {
        fragment
    }
}
