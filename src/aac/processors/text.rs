//! Casing detection and conversion for labels and generated identifiers.
//!
//! Board formats disagree about how identifiers are spelled: Grid 3 names grid
//! folders after their display text, Open Board files use snake-case ids, and
//! spreadsheets tend to carry whatever the author typed. These helpers give the
//! processors one vocabulary for moving between those spellings.

use serde::{Deserialize, Serialize};

/// Casing variants recognised by [`detect_casing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Casing {
    /// `hello world`
    Lower,
    /// `HELLO WORLD`
    Upper,
    /// `Hello World`
    Title,
    /// `Hello world`
    Sentence,
    /// `helloWorld`
    Camel,
    /// `HelloWorld`
    Pascal,
    /// `hello_world`
    Snake,
    /// `hello-world`
    Kebab,
    /// Anything else, including text without letters.
    Mixed,
}

/// Detects the casing convention used by `text`.
pub fn detect_casing(text: &str) -> Casing {
    let text = text.trim();
    if !text.chars().any(char::is_alphabetic) {
        return Casing::Mixed;
    }

    let has_space = text.contains(char::is_whitespace);
    let has_underscore = text.contains('_');
    let has_hyphen = text.contains('-');
    let has_upper = text.chars().any(char::is_uppercase);
    let has_lower = text.chars().any(char::is_lowercase);

    if !has_space && has_underscore && !has_hyphen && !has_upper {
        return Casing::Snake;
    }
    if !has_space && has_hyphen && !has_underscore && !has_upper {
        return Casing::Kebab;
    }
    if !has_lower {
        return Casing::Upper;
    }
    if !has_upper {
        return Casing::Lower;
    }

    if !has_space && !has_underscore && !has_hyphen {
        let first_upper = text.chars().next().is_some_and(char::is_uppercase);
        return if first_upper {
            Casing::Pascal
        } else {
            Casing::Camel
        };
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let capitalised = |word: &&str| word.chars().next().is_some_and(char::is_uppercase);
    let rest_lower = |word: &&str| !word.chars().skip(1).any(char::is_uppercase);

    if words.iter().all(|word| capitalised(word) && rest_lower(word)) {
        return Casing::Title;
    }
    if words.first().is_some_and(|word| capitalised(word))
        && words
            .iter()
            .skip(1)
            .all(|word| !word.chars().any(char::is_uppercase))
    {
        return Casing::Sentence;
    }

    Casing::Mixed
}

/// Upper-cases the first character and lower-cases the rest.
pub fn capitalise(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Splits free text into lowercase words, breaking on whitespace,
/// punctuation and lower→upper transitions (`fooBar` → `foo`, `bar`).
pub fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;

    for ch in text.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if ch.is_uppercase() && previous_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        previous_lower = ch.is_lowercase() || ch.is_numeric();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
}

/// Converts `text` to the requested casing. [`Casing::Mixed`] leaves the text
/// untouched.
pub fn to_case(text: &str, casing: Casing) -> String {
    let words = split_words(text);
    match casing {
        Casing::Lower => words.join(" "),
        Casing::Upper => words.join(" ").to_uppercase(),
        Casing::Title => words
            .iter()
            .map(|word| capitalise(word))
            .collect::<Vec<_>>()
            .join(" "),
        Casing::Sentence => {
            let joined = words.join(" ");
            capitalise(&joined)
        }
        Casing::Camel => {
            let mut out = String::new();
            for (index, word) in words.iter().enumerate() {
                if index == 0 {
                    out.push_str(word);
                } else {
                    out.push_str(&capitalise(word));
                }
            }
            out
        }
        Casing::Pascal => words.iter().map(|word| capitalise(word)).collect(),
        Casing::Snake => words.join("_"),
        Casing::Kebab => words.join("-"),
        Casing::Mixed => text.to_string(),
    }
}

/// Turns an identifier such as `food_and_drink` into a readable label
/// (`Food and drink`).
pub fn label_from_identifier(identifier: &str) -> String {
    to_case(identifier, Casing::Sentence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_casings() {
        assert_eq!(detect_casing("hello world"), Casing::Lower);
        assert_eq!(detect_casing("HELLO"), Casing::Upper);
        assert_eq!(detect_casing("Hello World"), Casing::Title);
        assert_eq!(detect_casing("Hello world"), Casing::Sentence);
        assert_eq!(detect_casing("helloWorld"), Casing::Camel);
        assert_eq!(detect_casing("HelloWorld"), Casing::Pascal);
        assert_eq!(detect_casing("hello_world"), Casing::Snake);
        assert_eq!(detect_casing("hello-world"), Casing::Kebab);
        assert_eq!(detect_casing("123"), Casing::Mixed);
    }

    #[test]
    fn converts_between_casings() {
        assert_eq!(to_case("food and drink", Casing::Snake), "food_and_drink");
        assert_eq!(to_case("foodAndDrink", Casing::Title), "Food And Drink");
        assert_eq!(to_case("Food-Drink", Casing::Pascal), "FoodDrink");
        assert_eq!(to_case("I want", Casing::Camel), "iWant");
        assert_eq!(label_from_identifier("food_and_drink"), "Food and drink");
    }

    #[test]
    fn capitalise_lowers_the_tail() {
        assert_eq!(capitalise("hELLO"), "Hello");
        assert_eq!(capitalise("ärger"), "Ärger");
        assert_eq!(capitalise(""), "");
    }
}
