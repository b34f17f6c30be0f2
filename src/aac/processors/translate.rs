use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::aac::processors::action::PARAM_TEXT;
use crate::aac::processors::error::Result;
use crate::aac::processors::io::{BoardProcessor, Source};
use crate::aac::processors::model::Tree;

/// Reserved key naming the language a map translates into.
pub const TARGET_LANG_KEY: &str = "target_lang";

/// Original text → replacement, plus an optional target language.
///
/// Entries are kept sorted so any code that walks the map sees the same order
/// regardless of how the map was assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationMap {
    entries: BTreeMap<String, String>,
    target_lang: Option<String>,
}

impl TranslationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from `(original, replacement)` pairs. Pairs with a missing
    /// side are skipped.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Option<String>, Option<String>)>,
    {
        let mut map = Self::new();
        for pair in pairs {
            if let (Some(original), Some(replacement)) = pair {
                map.insert(original, replacement);
            }
        }
        map
    }

    /// Builds a map from a JSON object. Non-string values are skipped.
    pub fn from_json_value(value: &Value) -> Self {
        let mut map = Self::new();
        let Some(object) = value.as_object() else {
            return map;
        };
        for (key, value) in object {
            match value.as_str() {
                Some(replacement) => map.insert(key.clone(), replacement.to_string()),
                None => debug!(key = %key, "skipping non-string translation entry"),
            }
        }
        map
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_json_value(&value))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Adds a rule. The reserved target-language key sets the language
    /// instead.
    pub fn insert(&mut self, original: String, replacement: String) {
        if original == TARGET_LANG_KEY {
            self.target_lang = Some(replacement);
        } else {
            self.entries.insert(original, replacement);
        }
    }

    pub fn with_target_lang(mut self, lang: impl Into<String>) -> Self {
        self.target_lang = Some(lang.into());
        self
    }

    pub fn target_lang(&self) -> Option<&str> {
        self.target_lang.as_deref()
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    /// Replacement for `text`, trying the exact string and then its trimmed
    /// form. A trimmed match keeps the surrounding whitespace.
    pub fn lookup(&self, text: &str) -> Option<String> {
        if let Some(replacement) = self.get(text) {
            return Some(replacement.to_string());
        }
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.len() == text.len() {
            return None;
        }
        let replacement = self.get(trimmed)?;
        let start = text.len() - text.trim_start().len();
        let end = start + trimmed.len();
        Some(format!("{}{replacement}{}", &text[..start], &text[end..]))
    }

    /// Applies [`TranslationMap::lookup`] in place. Returns whether the value
    /// changed.
    pub fn apply(&self, text: &mut String) -> bool {
        match self.lookup(text) {
            Some(replacement) if replacement != *text => {
                *text = replacement;
                true
            }
            _ => false,
        }
    }

    /// True when the map holds no rules. A target language alone still
    /// counts as empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Rewrites every translatable string in the tree. Returns the number of
/// strings that changed.
pub fn translate_tree(tree: &mut Tree, translations: &TranslationMap) -> usize {
    let mut changed = 0;
    let mut apply = |text: &mut String| {
        if translations.apply(text) {
            changed += 1;
        }
    };

    if let Some(name) = tree.metadata.name.as_mut() {
        apply(name);
    }
    if let Some(description) = tree.metadata.description.as_mut() {
        apply(description);
    }
    for page in tree.pages_mut() {
        apply(&mut page.name);
        for button in &mut page.buttons {
            apply(&mut button.label);
            apply(&mut button.message);
            if let Some(action) = button.semantic_action.as_mut() {
                if let Some(Value::String(text)) = action.parameters.get_mut(PARAM_TEXT) {
                    apply(text);
                }
            }
        }
    }

    if let Some(lang) = translations.target_lang() {
        tree.metadata.language = Some(lang.to_string());
    }
    changed
}

/// Translatable strings of a tree: the board-set name and description, then
/// per page (in id order) the page name, each label, each message that
/// differs from its label, and the text of the button's action when it
/// differs from both. These are the strings [`translate_tree`] rewrites.
pub fn extract_tree_texts(tree: &Tree) -> Vec<String> {
    extract_with_context(tree)
        .into_iter()
        .map(|entry| entry.text)
        .collect()
}

/// A translatable string with the place it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextualText {
    pub text: String,
    pub page_id: Option<String>,
    /// Page names from the root to the page holding the text.
    pub path: Vec<String>,
    /// Symbol reference of the button, when the text is a button's.
    pub symbol: Option<String>,
}

/// Like [`extract_tree_texts`] but keeps page and symbol context, which
/// translators use to disambiguate short words.
pub fn extract_with_context(tree: &Tree) -> Vec<ContextualText> {
    let mut texts = Vec::new();
    let mut push = |text: &str, page_id: Option<&str>, path: &[String], symbol: Option<&str>| {
        if text.trim().is_empty() {
            return;
        }
        texts.push(ContextualText {
            text: text.to_string(),
            page_id: page_id.map(str::to_string),
            path: path.to_vec(),
            symbol: symbol.map(str::to_string),
        });
    };

    for board_text in [&tree.metadata.name, &tree.metadata.description] {
        if let Some(text) = board_text.as_deref() {
            push(text, None, &[], None);
        }
    }
    for page in tree.pages() {
        let path: Vec<String> = tree
            .path_to_page(&page.id)
            .iter()
            .filter_map(|id| tree.get_page(id).map(|page| page.name.clone()))
            .collect();
        push(&page.name, Some(&page.id), &path, None);
        for button in &page.buttons {
            let symbol = button.image.as_deref();
            push(&button.label, Some(&page.id), &path, symbol);
            if button.message != button.label {
                push(&button.message, Some(&page.id), &path, symbol);
            }
            let action_text = button
                .semantic_action
                .as_ref()
                .and_then(|action| action.parameters.get(PARAM_TEXT))
                .and_then(Value::as_str)
                .filter(|text| *text != button.label && *text != button.message);
            if let Some(text) = action_text {
                push(text, Some(&page.id), &path, symbol);
            }
        }
    }
    texts
}

/// `<stem>_<lang>.<ext>` next to the input.
pub fn default_output_path(input: &Path, lang: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match input.extension() {
        Some(ext) => format!("{stem}_{lang}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{lang}"),
    };
    input.with_file_name(file_name)
}

/// Translates `input` into `output` with the processor's own strategy and
/// returns the bytes written.
#[instrument(
    level = "info",
    skip_all,
    fields(format = processor.name(), input = %input.display(), output = %output.display())
)]
pub fn translate_file(
    processor: &dyn BoardProcessor,
    input: &Path,
    translations: &TranslationMap,
    output: &Path,
) -> Result<Vec<u8>> {
    let bytes = processor.process_texts(Source::Path(input), translations, output)?;
    info!(
        rules = translations.len(),
        target_lang = translations.target_lang().unwrap_or(""),
        bytes = bytes.len(),
        "translated board file"
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aac::processors::action::{ActionIntent, SemanticAction};
    use crate::aac::processors::model::{Button, Page};
    use serde_json::json;

    #[test]
    fn malformed_entries_are_skipped() {
        let map = TranslationMap::from_json_value(&json!({
            "Hello": "Bonjour",
            "Broken": null,
            "Number": 3,
            "target_lang": "fr"
        }));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("Hello"), Some("Bonjour"));
        assert_eq!(map.target_lang(), Some("fr"));

        let pairs = TranslationMap::from_pairs([
            (Some("yes".to_string()), Some("oui".to_string())),
            (None, Some("orphan".to_string())),
            (Some("no".to_string()), None),
        ]);
        assert_eq!(pairs.iter().collect::<Vec<_>>(), vec![("yes", "oui")]);
    }

    #[test]
    fn trimmed_lookup_keeps_padding() {
        let map = TranslationMap::from_pairs([(Some("eat".into()), Some("manger".into()))]);
        assert_eq!(map.lookup(" eat  ").as_deref(), Some(" manger  "));
        assert_eq!(map.lookup("drink"), None);
    }

    #[test]
    fn translates_tree_and_sets_language() {
        let mut tree = Tree::new();
        tree.add_page(Page::new("home", "Home").with_button(Button::speak("b1", "Hello")))
            .expect("page");
        let map = TranslationMap::from_pairs([
            (Some("Home".into()), Some("Accueil".into())),
            (Some("Hello".into()), Some("Bonjour".into())),
        ])
        .with_target_lang("fr");

        assert_eq!(translate_tree(&mut tree, &map), 3);
        let page = tree.get_page("home").expect("home");
        assert_eq!(page.name, "Accueil");
        assert_eq!(page.buttons[0].message, "Bonjour");
        assert_eq!(tree.metadata.language.as_deref(), Some("fr"));
        assert_eq!(extract_tree_texts(&tree), vec!["Accueil", "Bonjour"]);
    }

    #[test]
    fn extraction_lists_every_string_translation_touches() {
        let mut hi = Button::speak("b1", "Hi");
        hi.message = "Hello there".into();
        hi.semantic_action = Some(
            SemanticAction::new(ActionIntent::InsertText).with_parameter(PARAM_TEXT, "Hi friend"),
        );
        let mut tree = Tree::new();
        tree.add_page(Page::new("home", "Home").with_button(hi))
            .expect("page");
        tree.metadata.name = Some("Core".into());
        tree.metadata.description = Some("Everyday words".into());

        let texts = extract_tree_texts(&tree);
        assert_eq!(
            texts,
            vec!["Core", "Everyday words", "Home", "Hi", "Hello there", "Hi friend"]
        );
        for candidate in ["Core", "Everyday words", "Home", "Hi", "Hello there", "Hi friend", "Bye"] {
            let map = TranslationMap::from_pairs([(Some(candidate.into()), Some("X".into()))]);
            let mut copy = tree.clone();
            if translate_tree(&mut copy, &map) > 0 {
                assert!(texts.iter().any(|text| text == candidate), "{candidate}: {texts:?}");
            }
        }
    }

    #[test]
    fn output_path_carries_language() {
        assert_eq!(
            default_output_path(Path::new("/boards/core.gridset"), "de"),
            PathBuf::from("/boards/core_de.gridset")
        );
    }
}
