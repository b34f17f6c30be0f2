use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::aac::processors::action::{ActionIntent, SemanticAction};
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::style::{Style, StyleSheet};

/// Identifier assigned to a page. Formats disagree on the shape (integers,
/// UUIDs, grid names), so the canonical model keeps the plain string.
pub type PageId = String;

/// Prefix of content-derived audio identifiers.
pub const AUDIO_ID_PREFIX: &str = "SND:";

/// What pressing a button does, at the coarsest level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ButtonType {
    /// Speaks or inserts the button's message.
    #[default]
    Speak,
    /// Opens the page named by `target_page_id`.
    Navigate,
    /// Runs a system action such as clearing the message bar.
    Action,
}

impl ButtonType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ButtonType::Speak => "SPEAK",
            ButtonType::Navigate => "NAVIGATE",
            ButtonType::Action => "ACTION",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SPEAK" => Some(ButtonType::Speak),
            "NAVIGATE" => Some(ButtonType::Navigate),
            "ACTION" => Some(ButtonType::Action),
            _ => None,
        }
    }

    /// Button type implied by a semantic action.
    pub fn for_intent(intent: ActionIntent) -> Self {
        match intent {
            ActionIntent::NavigateTo => ButtonType::Navigate,
            ActionIntent::Speak
            | ActionIntent::SpeakCustom
            | ActionIntent::InsertText
            | ActionIntent::PlayAudio
            | ActionIntent::Custom => ButtonType::Speak,
            _ => ButtonType::Action,
        }
    }
}

/// Grid dimensions of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub rows: u32,
    pub columns: u32,
}

impl GridLayout {
    pub const fn new(rows: u32, columns: u32) -> Self {
        Self { rows, columns }
    }

    /// Smallest roughly square grid holding `count` cells.
    pub fn fitting(count: usize) -> Self {
        let count = count.max(1) as u32;
        let mut columns = 1;
        while columns * columns < count {
            columns += 1;
        }
        let rows = count.div_ceil(columns);
        Self { rows, columns }
    }
}

/// A recorded message attached to a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRecording {
    /// Row id in the source container, when it has one.
    pub id: Option<i64>,
    pub data: Vec<u8>,
    /// `SND:<sha1-hex>` of `data`.
    pub identifier: String,
    /// Opaque provenance string, usually JSON.
    pub metadata: Option<String>,
}

impl AudioRecording {
    /// Creates a recording whose identifier is derived from its bytes.
    pub fn new(data: Vec<u8>) -> Self {
        let identifier = Self::identifier_for(&data);
        Self {
            id: None,
            data,
            identifier,
            metadata: None,
        }
    }

    /// Content identifier for raw audio bytes.
    pub fn identifier_for(data: &[u8]) -> String {
        format!("{AUDIO_ID_PREFIX}{}", sha1_hex(data))
    }
}

/// Lowercase hex SHA-1 digest.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// A single cell on a page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub label: String,
    /// Text spoken or inserted when the button is pressed.
    pub message: String,
    #[serde(rename = "type")]
    pub button_type: ButtonType,
    /// Only meaningful for [`ButtonType::Navigate`]. May name a page that is
    /// not in the tree.
    pub target_page_id: Option<PageId>,
    /// Vendor command id the button was loaded with (e.g. `Jump.To`).
    pub action: Option<String>,
    pub semantic_action: Option<SemanticAction>,
    pub style: Option<Style>,
    /// Opaque token pointing back into the source container.
    pub image: Option<String>,
    pub audio: Option<AudioRecording>,
    /// Grid cell `(x, y)`.
    pub position: Option<(u32, u32)>,
}

impl Button {
    /// Creates a speak button whose message equals its label.
    pub fn speak(id: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            message: label.clone(),
            label,
            ..Self::default()
        }
    }

    /// Creates a navigation button.
    pub fn navigate(
        id: impl Into<String>,
        label: impl Into<String>,
        target: impl Into<PageId>,
    ) -> Self {
        let target = target.into();
        Self {
            button_type: ButtonType::Navigate,
            semantic_action: Some(SemanticAction::navigate_to(target.clone())),
            target_page_id: Some(target),
            ..Self::speak(id, label)
        }
    }

    /// Navigation target, only for navigate buttons.
    pub fn navigation_target(&self) -> Option<&str> {
        match self.button_type {
            ButtonType::Navigate => self.target_page_id.as_deref(),
            _ => None,
        }
    }
}

/// A page of buttons.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub name: String,
    pub buttons: Vec<Button>,
    /// Lookup-only reference to the page this one was reached from.
    pub parent_id: Option<PageId>,
    pub grid: Option<GridLayout>,
    pub style: Option<Style>,
}

impl Page {
    pub fn new(id: impl Into<PageId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a button and returns the page for chaining.
    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    /// Ids of pages this page links to, in button order, without repeats.
    pub fn navigation_targets(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.buttons
            .iter()
            .filter_map(Button::navigation_target)
            .filter(|target| seen.insert(*target))
            .collect()
    }
}

/// Board-set level information that is not tied to a page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    /// BCP 47 language tag.
    pub language: Option<String>,
}

/// The canonical, format-agnostic board set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tree {
    pages: BTreeMap<PageId, Page>,
    pub root_id: Option<PageId>,
    #[serde(default)]
    pub metadata: TreeMetadata,
    #[serde(default)]
    pub styles: StyleSheet,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a page. Fails when the id is already taken.
    pub fn add_page(&mut self, page: Page) -> Result<()> {
        if self.pages.contains_key(&page.id) {
            return Err(ProcessorError::DuplicateId(page.id));
        }
        self.pages.insert(page.id.clone(), page);
        Ok(())
    }

    pub fn get_page(&self, id: &str) -> Option<&Page> {
        self.pages.get(id)
    }

    pub fn get_page_mut(&mut self, id: &str) -> Option<&mut Page> {
        self.pages.get_mut(id)
    }

    /// Pages in id order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub fn pages_mut(&mut self) -> impl Iterator<Item = &mut Page> {
        self.pages.values_mut()
    }

    pub fn page_ids(&self) -> impl Iterator<Item = &PageId> {
        self.pages.keys()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// The root page, when it is set and present.
    pub fn root_page(&self) -> Option<&Page> {
        self.root_id.as_deref().and_then(|id| self.get_page(id))
    }

    /// Root id if present in the tree, otherwise the first page id.
    pub fn effective_root_id(&self) -> Option<&str> {
        self.root_page()
            .map(|page| page.id.as_str())
            .or_else(|| self.pages.keys().next().map(String::as_str))
    }

    /// Visits every page reachable from the root exactly once, breadth first.
    /// Without a root every page is a starting point, in id order. Cycles,
    /// self links and dangling targets are fine.
    pub fn traverse<F: FnMut(&Page)>(&self, mut visitor: F) {
        let starts: Vec<&str> = match self.root_page() {
            Some(root) => vec![root.id.as_str()],
            None => self.pages.keys().map(String::as_str).collect(),
        };

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for start in starts {
            queue.push_back(start);
            while let Some(id) = queue.pop_front() {
                if !visited.insert(id) {
                    continue;
                }
                let Some(page) = self.pages.get(id) else {
                    continue;
                };
                visitor(page);
                for target in page.navigation_targets() {
                    if !visited.contains(target) {
                        queue.push_back(target);
                    }
                }
            }
        }
    }

    /// Ids of the pages [`Tree::traverse`] visits.
    pub fn reachable_page_ids(&self) -> BTreeSet<PageId> {
        let mut ids = BTreeSet::new();
        self.traverse(|page| {
            ids.insert(page.id.clone());
        });
        ids
    }

    /// Shortest navigation path from the root to `id`, both ends included.
    /// Falls back to just `id` when it is not reachable.
    pub fn path_to_page(&self, id: &str) -> Vec<PageId> {
        let Some(root) = self.root_page() else {
            return vec![id.to_string()];
        };

        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([root.id.as_str()]);
        let mut queue = VecDeque::from([root.id.as_str()]);
        while let Some(current) = queue.pop_front() {
            if current == id {
                let mut path = vec![current.to_string()];
                let mut cursor = current;
                while let Some(parent) = previous.get(cursor) {
                    path.push(parent.to_string());
                    cursor = parent;
                }
                path.reverse();
                return path;
            }
            let Some(page) = self.pages.get(current) else {
                continue;
            };
            for target in page.navigation_targets() {
                if visited.insert(target) {
                    previous.insert(target, current);
                    queue.push_back(target);
                }
            }
        }

        vec![id.to_string()]
    }

    /// Renames pages and rewrites every reference to them: the root,
    /// parents, navigation targets and navigation parameters. Ids missing from
    /// `mapping` keep their value, including dangling targets. When two pages
    /// would end up with the same id the tree is left untouched.
    pub fn remap_page_ids(&mut self, mapping: &HashMap<PageId, PageId>) -> Result<()> {
        let rename = |id: &PageId| mapping.get(id).cloned().unwrap_or_else(|| id.clone());

        let mut renamed: BTreeMap<PageId, Page> = BTreeMap::new();
        for page in self.pages.values() {
            let mut page = page.clone();
            page.id = rename(&page.id);
            page.parent_id = page.parent_id.as_ref().map(rename);
            for button in &mut page.buttons {
                button.target_page_id = button.target_page_id.as_ref().map(rename);
                if let Some(action) = button.semantic_action.as_mut() {
                    if let Some(target) = action.target().map(str::to_string) {
                        action.parameters.insert(
                            crate::aac::processors::action::PARAM_TARGET.to_string(),
                            serde_json::Value::String(rename(&target)),
                        );
                    }
                }
            }
            if renamed.contains_key(&page.id) {
                return Err(ProcessorError::DuplicateId(page.id));
            }
            renamed.insert(page.id.clone(), page);
        }
        self.pages = renamed;
        self.root_id = self.root_id.as_ref().map(rename);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle() -> Tree {
        let mut tree = Tree::new();
        for (id, next) in [("a", "b"), ("b", "c"), ("c", "a")] {
            let page = Page::new(id, id.to_uppercase())
                .with_button(Button::navigate(format!("{id}-next"), next, next));
            tree.add_page(page).expect("page added");
        }
        tree.root_id = Some("a".into());
        tree
    }

    #[test]
    fn duplicate_page_ids_are_rejected() {
        let mut tree = Tree::new();
        tree.add_page(Page::new("home", "Home")).expect("first insert");
        let err = tree
            .add_page(Page::new("home", "Other"))
            .expect_err("duplicate rejected");
        assert!(matches!(err, ProcessorError::DuplicateId(id) if id == "home"));
        assert!(tree.get_page("missing").is_none());
    }

    #[test]
    fn path_to_page_follows_navigation() {
        let tree = cycle();
        assert_eq!(tree.path_to_page("c"), vec!["a", "b", "c"]);
        assert_eq!(tree.path_to_page("zzz"), vec!["zzz"]);
    }

    #[test]
    fn remap_rewrites_references_and_keeps_dangling_targets() {
        let mut tree = cycle();
        tree.get_page_mut("c")
            .expect("page c")
            .buttons
            .push(Button::navigate("c-lost", "Lost", "nowhere"));
        let mapping = HashMap::from([("a".to_string(), "Alpha".to_string())]);
        tree.remap_page_ids(&mapping).expect("remapped");

        assert_eq!(tree.root_id.as_deref(), Some("Alpha"));
        let c = tree.get_page("c").expect("page c");
        assert_eq!(c.buttons[0].target_page_id.as_deref(), Some("Alpha"));
        assert_eq!(
            c.buttons[0].semantic_action.as_ref().and_then(|a| a.target()),
            Some("Alpha")
        );
        assert_eq!(c.buttons[1].target_page_id.as_deref(), Some("nowhere"));
    }

    #[test]
    fn colliding_remap_leaves_tree_untouched() {
        let mut tree = cycle();
        let before = tree.clone();
        let mapping = HashMap::from([("a".to_string(), "b".to_string())]);
        let err = tree.remap_page_ids(&mapping).expect_err("collision");
        assert!(matches!(err, ProcessorError::DuplicateId(id) if id == "b"));
        assert_eq!(tree, before);
    }

    #[test]
    fn grid_fitting_is_roughly_square() {
        assert_eq!(GridLayout::fitting(0), GridLayout::new(1, 1));
        assert_eq!(GridLayout::fitting(4), GridLayout::new(2, 2));
        assert_eq!(GridLayout::fitting(5), GridLayout::new(2, 3));
    }

    #[test]
    fn audio_identifier_is_content_derived() {
        let recording = AudioRecording::new(b"abc".to_vec());
        assert_eq!(
            recording.identifier,
            "SND:a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
