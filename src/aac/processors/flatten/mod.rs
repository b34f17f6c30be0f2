//! Flattening of a [`Tree`] into spreadsheet tables and back.
//!
//! The workbook has three sheets: `Pages` (one row per page), `Buttons` (one
//! row per button, in page then button order) and `Metadata` (key/value rows
//! for board-set information). Columns are located by header, so a workbook
//! edited by hand may reorder them. Structured values (styles, semantic
//! actions) are stored as compact JSON.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::aac::processors::action::SemanticAction;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::model::{Button, ButtonType, GridLayout, Page, Tree};
use crate::aac::processors::style::{Style, StyleSheet};
use crate::aac::processors::text::label_from_identifier;

/// Sheet holding one row per page.
pub const PAGES_SHEET: &str = "Pages";
/// Sheet holding one row per button.
pub const BUTTONS_SHEET: &str = "Buttons";
/// Sheet holding board-set key/value pairs.
pub const METADATA_SHEET: &str = "Metadata";

const PAGE_COLUMNS: [&str; 6] = ["id", "name", "parent_id", "rows", "columns", "style"];
const BUTTON_COLUMNS: [&str; 12] = [
    "page_id",
    "id",
    "label",
    "message",
    "type",
    "target_page_id",
    "x",
    "y",
    "image",
    "style",
    "action",
    "vendor_action",
];
const METADATA_COLUMNS: [&str; 2] = ["key", "value"];

const KEY_NAME: &str = "name";
const KEY_DESCRIPTION: &str = "description";
const KEY_LANGUAGE: &str = "language";
const KEY_ROOT: &str = "root_id";
const KEY_STYLES: &str = "styles";

/// A table that will be materialised as an Excel sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    fn new(sheet_name: &str, columns: &[&str]) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Rows as header → value maps. Cells past the header row are ignored.
    fn records(&self) -> impl Iterator<Item = Record<'_>> {
        let index: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(position, column)| (column.trim(), position))
            .collect();
        self.rows.iter().map(move |row| Record {
            index: index.clone(),
            row,
        })
    }
}

struct Record<'a> {
    index: HashMap<&'a str, usize>,
    row: &'a [String],
}

impl Record<'_> {
    /// Trimmed cell value; `None` when the column is absent or blank.
    fn get(&self, column: &str) -> Option<&str> {
        let value = self.row.get(*self.index.get(column)?)?.trim();
        (!value.is_empty()).then_some(value)
    }

    /// Untrimmed cell value, for text where surrounding spaces matter.
    fn raw(&self, column: &str) -> Option<&str> {
        let value = self.row.get(*self.index.get(column)?)?;
        (!value.trim().is_empty()).then_some(value.as_str())
    }

    fn number(&self, column: &str) -> Option<u32> {
        let value: f64 = self.get(column)?.parse().ok()?;
        (value >= 0.0).then_some(value as u32)
    }
}

/// Represents all tables required to materialise the Excel workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookData {
    pub tables: Vec<SheetTable>,
}

impl WorkbookData {
    pub fn table(&self, sheet_name: &str) -> Option<&SheetTable> {
        self.tables
            .iter()
            .find(|table| table.sheet_name.eq_ignore_ascii_case(sheet_name))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn style_cell(style: Option<&Style>) -> Result<String> {
    match style.filter(|style| !style.is_empty()) {
        Some(style) => to_json(style),
        None => Ok(String::new()),
    }
}

/// Flattens the tree into the `Pages`, `Buttons` and `Metadata` tables.
pub fn build_workbook(tree: &Tree) -> Result<WorkbookData> {
    let mut pages = SheetTable::new(PAGES_SHEET, &PAGE_COLUMNS);
    let mut buttons = SheetTable::new(BUTTONS_SHEET, &BUTTON_COLUMNS);

    for page in tree.pages() {
        let grid = page.grid;
        pages.rows.push(vec![
            page.id.clone(),
            page.name.clone(),
            page.parent_id.clone().unwrap_or_default(),
            grid.map(|grid| grid.rows.to_string()).unwrap_or_default(),
            grid.map(|grid| grid.columns.to_string()).unwrap_or_default(),
            style_cell(page.style.as_ref())?,
        ]);

        for button in &page.buttons {
            let (x, y) = match button.position {
                Some((x, y)) => (x.to_string(), y.to_string()),
                None => (String::new(), String::new()),
            };
            let action = match &button.semantic_action {
                Some(action) => to_json(action)?,
                None => String::new(),
            };
            buttons.rows.push(vec![
                page.id.clone(),
                button.id.clone(),
                button.label.clone(),
                button.message.clone(),
                button.button_type.as_str().to_string(),
                button.target_page_id.clone().unwrap_or_default(),
                x,
                y,
                button.image.clone().unwrap_or_default(),
                style_cell(button.style.as_ref())?,
                action,
                button.action.clone().unwrap_or_default(),
            ]);
        }
    }

    let mut metadata = SheetTable::new(METADATA_SHEET, &METADATA_COLUMNS);
    let mut push = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            metadata.rows.push(vec![key.to_string(), value]);
        }
    };
    push(KEY_NAME, tree.metadata.name.clone());
    push(KEY_DESCRIPTION, tree.metadata.description.clone());
    push(KEY_LANGUAGE, tree.metadata.language.clone());
    push(KEY_ROOT, tree.root_id.clone());
    if tree.styles != StyleSheet::default() {
        push(KEY_STYLES, Some(to_json(&tree.styles)?));
    }

    Ok(WorkbookData {
        tables: vec![pages, buttons, metadata],
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(
    format: &'static str,
    column: &str,
    raw: &str,
) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|err| ProcessorError::load(format, format!("invalid {column} cell: {err}")))
}

/// Rebuilds a tree from the tables. `format` names the source in errors.
pub fn tree_from_workbook(format: &'static str, workbook: &WorkbookData) -> Result<Tree> {
    let pages_table = workbook
        .table(PAGES_SHEET)
        .ok_or_else(|| ProcessorError::load(format, format!("missing sheet '{PAGES_SHEET}'")))?;

    let mut pages: BTreeMap<String, Page> = BTreeMap::new();
    for record in pages_table.records() {
        let Some(id) = record.get("id") else {
            continue;
        };
        let name = record
            .raw("name")
            .map(str::to_string)
            .unwrap_or_else(|| label_from_identifier(id));
        let mut page = Page::new(id, name);
        page.parent_id = record.get("parent_id").map(str::to_string);
        if let (Some(rows), Some(columns)) = (record.number("rows"), record.number("columns")) {
            page.grid = Some(GridLayout::new(rows, columns));
        }
        if let Some(style) = record.get("style") {
            page.style = Some(parse_json(format, "style", style)?);
        }
        if pages.insert(id.to_string(), page).is_some() {
            return Err(ProcessorError::DuplicateId(id.to_string()));
        }
    }

    if let Some(buttons_table) = workbook.table(BUTTONS_SHEET) {
        for record in buttons_table.records() {
            let (Some(page_id), Some(id)) = (record.get("page_id"), record.get("id")) else {
                continue;
            };
            let Some(page) = pages.get_mut(page_id) else {
                debug!(page = page_id, button = id, "button row for unknown page");
                continue;
            };
            page.buttons.push(button_from_record(format, &record, id)?);
        }
    }

    let mut tree = Tree::new();
    if let Some(metadata) = workbook.table(METADATA_SHEET) {
        for record in metadata.records() {
            let (Some(key), Some(value)) = (record.get("key"), record.raw("value")) else {
                continue;
            };
            match key {
                KEY_NAME => tree.metadata.name = Some(value.to_string()),
                KEY_DESCRIPTION => tree.metadata.description = Some(value.to_string()),
                KEY_LANGUAGE => tree.metadata.language = Some(value.trim().to_string()),
                KEY_ROOT => tree.root_id = Some(value.trim().to_string()),
                KEY_STYLES => tree.styles = parse_json(format, KEY_STYLES, value)?,
                other => debug!(key = other, "ignoring unknown metadata key"),
            }
        }
    }

    for page in pages.into_values() {
        tree.add_page(page)?;
    }
    Ok(tree)
}

fn button_from_record(format: &'static str, record: &Record<'_>, id: &str) -> Result<Button> {
    let label = record.raw("label").unwrap_or_default();
    let mut button = Button::speak(id, label);
    button.message = record.raw("message").unwrap_or_default().to_string();
    button.button_type = record
        .get("type")
        .and_then(ButtonType::from_name)
        .unwrap_or_default();
    button.target_page_id = record.get("target_page_id").map(str::to_string);
    if let (Some(x), Some(y)) = (record.number("x"), record.number("y")) {
        button.position = Some((x, y));
    }
    button.image = record.get("image").map(str::to_string);
    if let Some(style) = record.get("style") {
        button.style = Some(parse_json(format, "style", style)?);
    }
    if let Some(action) = record.get("action") {
        let action: SemanticAction = parse_json(format, "action", action)?;
        button.semantic_action = Some(action);
    }
    button.action = record.raw("vendor_action").map(str::to_string);
    Ok(button)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aac::processors::style::Color;

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        let mut hello = Button::speak("b2", " Hello ");
        hello.position = Some((1, 0));
        hello.style = Some(Style::from_background(Color::rgb(0, 128, 0)));
        let mut home = Page::new("home", "Home")
            .with_button(Button::navigate("b1", "Food", "food"))
            .with_button(hello);
        home.grid = Some(GridLayout::new(2, 3));
        tree.add_page(home).expect("home");
        tree.add_page(Page::new("food", "Food")).expect("food");
        tree.root_id = Some("home".into());
        tree.metadata.language = Some("en".into());
        tree
    }

    #[test]
    fn tables_round_trip_tree() {
        let tree = sample_tree();
        let workbook = build_workbook(&tree).expect("workbook");
        assert_eq!(workbook.tables.len(), 3);
        assert_eq!(workbook.table("buttons").expect("buttons").rows.len(), 2);

        let back = tree_from_workbook("excel", &workbook).expect("tree");
        assert_eq!(back, tree);
    }

    #[test]
    fn reordered_columns_are_found_by_header() {
        let workbook = WorkbookData {
            tables: vec![SheetTable {
                sheet_name: PAGES_SHEET.to_string(),
                columns: vec!["name".into(), "id".into()],
                rows: vec![vec!["Start".into(), "p1".into()], vec!["".into(), "".into()]],
            }],
        };
        let tree = tree_from_workbook("excel", &workbook).expect("tree");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get_page("p1").map(|page| page.name.as_str()), Some("Start"));
    }

    #[test]
    fn missing_pages_sheet_is_a_load_error() {
        let workbook = WorkbookData { tables: Vec::new() };
        let err = tree_from_workbook("excel", &workbook).expect_err("no pages");
        assert!(matches!(err, ProcessorError::Load { .. }));
    }
}
