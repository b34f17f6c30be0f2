//! TouchChat vocabularies (`.ce`): a zip holding one `*.c4v` SQLite database.
//!
//! Pages and buttons are both `resources`; a page shows a button box whose
//! cells point at button resources by linear `location`. Actions hang off the
//! button's resource with their parameters in `action_data`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::aac::processors::action::{
    PARAM_TARGET, Platform, SemanticAction, denormalize, normalize,
};
use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::io::archive::{ArchiveEntry, read_entries, write_entries};
use crate::aac::processors::io::sqlite::{Schema, ScopedDatabase, translate_columns};
use crate::aac::processors::io::{BoardFormat, BoardProcessor, Source, write_output};
use crate::aac::processors::model::{Button, ButtonType, GridLayout, Page, Tree};
use crate::aac::processors::resource::ResourceResolver;
use crate::aac::processors::style::{Color, Style};
use crate::aac::processors::translate::TranslationMap;

const FORMAT: &str = "touchchat";
const DATABASE_EXTENSION: &str = ".c4v";
const HOME_PAGE: &str = "HOME";
const RESOURCE_PAGE: i64 = 1;
const RESOURCE_BUTTON: i64 = 2;
/// Marks a navigation target that names no page in the vocabulary, so it is
/// never read back as a numeric page id.
const UNRESOLVED_TARGET: &str = "rid:";

const SCHEMA: &str = r#"
CREATE TABLE resources (id INTEGER PRIMARY KEY, rid TEXT, name TEXT, type INTEGER);
CREATE TABLE pages (id INTEGER PRIMARY KEY, resource_id INTEGER, button_style_id INTEGER);
CREATE TABLE buttons (
    id INTEGER PRIMARY KEY,
    resource_id INTEGER,
    label TEXT,
    message TEXT,
    button_style_id INTEGER
);
CREATE TABLE button_boxes (id INTEGER PRIMARY KEY, layout_x INTEGER, layout_y INTEGER);
CREATE TABLE button_box_cells (
    id INTEGER PRIMARY KEY,
    button_box_id INTEGER,
    resource_id INTEGER,
    location INTEGER
);
CREATE TABLE button_box_instances (id INTEGER PRIMARY KEY, page_id INTEGER, button_box_id INTEGER);
CREATE TABLE actions (id INTEGER PRIMARY KEY, resource_id INTEGER, code INTEGER, rank INTEGER);
CREATE TABLE action_data (id INTEGER PRIMARY KEY, action_id INTEGER, key INTEGER, value TEXT);
CREATE TABLE button_styles (
    id INTEGER PRIMARY KEY,
    body_color INTEGER,
    border_color INTEGER,
    font_color INTEGER,
    font_name TEXT,
    font_height REAL
);
CREATE TABLE special_pages (id INTEGER PRIMARY KEY, name TEXT, page_id INTEGER);
"#;

const TEXT_COLUMNS: &[(&str, &str)] = &[
    ("resources", "name"),
    ("buttons", "label"),
    ("buttons", "message"),
];

/// Reads and writes TouchChat `.ce` vocabularies.
#[derive(Debug, Clone, Default)]
pub struct TouchChatProcessor {
    settings: Settings,
}

impl TouchChatProcessor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl BoardProcessor for TouchChatProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn extensions(&self) -> &'static [&'static str] {
        BoardFormat::TouchChat.extensions()
    }

    fn load_into_tree(&self, source: Source<'_>) -> Result<Tree> {
        let bytes = source.read()?;
        if bytes.is_empty() {
            return Ok(Tree::new());
        }
        let entries = read_entries(FORMAT, &bytes)?;
        let (_, database) = database_entry(&entries)?;
        let db = ScopedDatabase::materialize(FORMAT, &database.data)?;
        let mut tree = load_database(&db.connection)?;
        if tree.metadata.language.is_none() {
            tree.metadata.language = self.settings.default_language.clone();
        }
        Ok(tree)
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn save_with_resources(
        &self,
        tree: &Tree,
        _resources: &dyn ResourceResolver,
        destination: &Path,
    ) -> Result<()> {
        let mut db = ScopedDatabase::create()?;
        write_database(&mut db.connection, tree, self.settings.default_grid())?;
        let database = db.into_bytes()?;

        let stem = destination
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "vocabulary".to_string());
        let entry = ArchiveEntry::new(format!("{stem}{DATABASE_EXTENSION}"), database);
        let bytes = write_entries([&entry])?;
        write_output(destination, &bytes)?;
        info!(pages = tree.len(), bytes = bytes.len(), "wrote touchchat vocabulary");
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn process_texts(
        &self,
        source: Source<'_>,
        translations: &TranslationMap,
        destination: &Path,
    ) -> Result<Vec<u8>> {
        let bytes = source.read()?;
        if bytes.is_empty() {
            write_output(destination, &[])?;
            return Ok(Vec::new());
        }

        let mut entries = read_entries(FORMAT, &bytes)?;
        let (index, database) = database_entry(&entries)?;
        let mut db = ScopedDatabase::materialize(FORMAT, &database.data)?;
        let updated = translate_columns(&mut db.connection, TEXT_COLUMNS, translations)?;
        entries[index].data = db.into_bytes()?;

        let output = write_entries(&entries)?;
        write_output(destination, &output)?;
        info!(updated, "translated touchchat vocabulary");
        Ok(output)
    }
}

/// The vocabulary database inside the archive.
fn database_entry(entries: &[ArchiveEntry]) -> Result<(usize, &ArchiveEntry)> {
    entries
        .iter()
        .enumerate()
        .find(|(_, entry)| entry.name.to_ascii_lowercase().ends_with(DATABASE_EXTENSION))
        .ok_or_else(|| ProcessorError::load(FORMAT, "archive holds no .c4v vocabulary database"))
}

fn color_from_db(value: Option<i64>) -> Option<Color> {
    value.map(|argb| Color::from_argb(argb as u32))
}

fn color_to_db(color: Option<Color>) -> Option<i64> {
    color.map(|color| i64::from(color.to_argb()))
}

fn load_styles(connection: &Connection, schema: &Schema) -> Result<HashMap<i64, Style>> {
    let mut styles = HashMap::new();
    if !schema.has_table("button_styles") {
        return Ok(styles);
    }
    let columns = schema.select_list(
        "button_styles",
        &["id", "body_color", "border_color", "font_color", "font_name", "font_height"],
    );
    let mut statement = connection.prepare(&format!("SELECT {columns} FROM button_styles"))?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let Some(id) = row.get::<_, Option<i64>>(0)? else {
            continue;
        };
        let style = Style {
            background_color: color_from_db(row.get(1)?),
            border_color: color_from_db(row.get(2)?),
            font_color: color_from_db(row.get(3)?),
            font_family: row.get(4)?,
            font_size: row.get::<_, Option<f64>>(5)?.map(|size| size as f32),
            ..Style::default()
        };
        styles.insert(id, style);
    }
    Ok(styles)
}

/// First action of every resource, as `{"code": .., "data": {key: value}}`.
fn load_actions(connection: &Connection, schema: &Schema) -> Result<HashMap<i64, Value>> {
    let mut actions: HashMap<i64, Value> = HashMap::new();
    if !schema.has_column("actions", "resource_id") || !schema.has_column("actions", "code") {
        return Ok(actions);
    }

    let mut parameters: HashMap<i64, Map<String, Value>> = HashMap::new();
    if schema.has_table("action_data") {
        let columns = schema.select_list("action_data", &["action_id", "key", "value"]);
        let mut statement =
            connection.prepare(&format!("SELECT {columns} FROM action_data ORDER BY id"))?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let (Some(action), Some(key)) =
                (row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)
            else {
                continue;
            };
            let value: Option<String> = row.get(2)?;
            parameters
                .entry(action)
                .or_default()
                .insert(key.to_string(), value.map_or(Value::Null, Value::String));
        }
    }

    let order = if schema.has_column("actions", "rank") {
        "resource_id, rank, id"
    } else {
        "resource_id, id"
    };
    let mut statement = connection.prepare(&format!(
        "SELECT id, resource_id, code FROM actions ORDER BY {order}"
    ))?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let Some(resource) = row.get::<_, Option<i64>>(1)? else {
            continue;
        };
        if actions.contains_key(&resource) {
            continue;
        }
        let mut action = Map::new();
        action.insert("code".to_string(), Value::from(row.get::<_, Option<i64>>(2)?.unwrap_or(-1)));
        if let Some(data) = parameters.remove(&id) {
            action.insert("data".to_string(), Value::Object(data));
        }
        actions.insert(resource, Value::Object(action));
    }
    Ok(actions)
}

fn load_database(connection: &Connection) -> Result<Tree> {
    let schema = Schema::introspect(connection)?;
    let mut tree = Tree::new();
    if !schema.has_table("pages") || !schema.has_table("resources") {
        warn!("vocabulary has no pages");
        return Ok(tree);
    }

    let styles = load_styles(connection, &schema)?;
    let style_column = if schema.has_column("pages", "button_style_id") {
        "p.button_style_id"
    } else {
        "NULL"
    };
    let mut page_ids: HashMap<i64, String> = HashMap::new();
    let mut pages: BTreeMap<String, Page> = BTreeMap::new();
    {
        let mut statement = connection.prepare(&format!(
            "SELECT p.id, r.rid, r.name, {style_column} FROM pages p \
             LEFT JOIN resources r ON r.id = p.resource_id ORDER BY p.id"
        ))?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let numeric: i64 = row.get(0)?;
            let id = row
                .get::<_, Option<String>>(1)?
                .filter(|rid| !rid.is_empty())
                .unwrap_or_else(|| numeric.to_string());
            let mut page = Page::new(id.clone(), row.get::<_, Option<String>>(2)?.unwrap_or_default());
            page.style = row
                .get::<_, Option<i64>>(3)?
                .and_then(|style| styles.get(&style))
                .and_then(|style| style.background_color)
                .map(Style::from_background);
            page_ids.insert(numeric, id.clone());
            if pages.insert(id.clone(), page).is_some() {
                return Err(ProcessorError::DuplicateId(id));
            }
        }
    }

    if schema.has_table("special_pages") {
        let home = connection
            .query_row(
                "SELECT page_id FROM special_pages WHERE name = ?1 LIMIT 1",
                [HOME_PAGE],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        tree.root_id = home.and_then(|id| page_ids.get(&id).cloned());
    }

    let actions = load_actions(connection, &schema)?;
    let required = [
        ("button_box_instances", "page_id"),
        ("button_box_instances", "button_box_id"),
        ("button_boxes", "layout_x"),
        ("button_box_cells", "button_box_id"),
        ("button_box_cells", "resource_id"),
        ("button_box_cells", "location"),
        ("buttons", "resource_id"),
    ];
    if required
        .iter()
        .all(|(table, column)| schema.has_column(table, column))
    {
        let b = |column: &str| {
            if schema.has_column("buttons", column) {
                format!("b.{column}")
            } else {
                "NULL".to_string()
            }
        };
        let rows_column = if schema.has_column("button_boxes", "layout_y") {
            "bb.layout_y"
        } else {
            "NULL"
        };
        let sql = format!(
            "SELECT i.page_id, c.location, bb.layout_x, {rows_column}, b.id, b.resource_id, {}, {}, {} \
             FROM button_box_instances i \
             JOIN button_boxes bb ON bb.id = i.button_box_id \
             JOIN button_box_cells c ON c.button_box_id = bb.id \
             JOIN buttons b ON b.resource_id = c.resource_id \
             ORDER BY i.page_id, c.location, b.id",
            b("label"),
            b("message"),
            b("button_style_id"),
        );
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let page_numeric: i64 = row.get(0)?;
            let Some(page) = page_ids.get(&page_numeric).and_then(|id| pages.get_mut(id)) else {
                debug!(page = page_numeric, "button box on unknown page");
                continue;
            };
            let location = row.get::<_, Option<i64>>(1)?.unwrap_or_default().max(0) as u32;
            let columns = row.get::<_, Option<i64>>(2)?.unwrap_or(1).max(1) as u32;
            let rows_count = row.get::<_, Option<i64>>(3)?.map(|rows| rows.max(1) as u32);
            if page.grid.is_none() {
                page.grid = rows_count.map(|rows| GridLayout::new(rows, columns));
            }

            let id: i64 = row.get(4)?;
            let resource: Option<i64> = row.get(5)?;
            let label: String = row.get::<_, Option<String>>(6)?.unwrap_or_default();
            let mut button = Button::speak(id.to_string(), label);
            if let Some(message) = row.get::<_, Option<String>>(7)?.filter(|m| !m.is_empty()) {
                button.message = message;
            }
            button.position = Some((location % columns, location / columns));
            button.style = row
                .get::<_, Option<i64>>(8)?
                .and_then(|style| styles.get(&style))
                .cloned()
                .filter(|style| !style.is_empty());

            if let Some(vendor) = resource.and_then(|resource| actions.get(&resource)) {
                apply_action(&mut button, vendor, &page_ids);
            }
            page.buttons.push(button);
        }
    }

    for page in pages.into_values() {
        tree.add_page(page)?;
    }
    debug!(pages = tree.len(), "loaded touchchat vocabulary");
    Ok(tree)
}

/// Normalizes the vendor action and resolves navigation to page ids. Unknown
/// and unresolved targets are kept as written.
fn apply_action(button: &mut Button, vendor: &Value, page_ids: &HashMap<i64, String>) {
    let mut action = normalize(vendor, Platform::TouchChat);
    button.button_type = ButtonType::for_intent(action.intent);
    button.action = vendor
        .get("code")
        .and_then(Value::as_i64)
        .map(|code| code.to_string());
    if button.button_type == ButtonType::Navigate {
        let target = action.target().map(|raw| match raw.strip_prefix(UNRESOLVED_TARGET) {
            Some(unresolved) => unresolved.to_string(),
            None => raw
                .parse::<i64>()
                .ok()
                .and_then(|numeric| page_ids.get(&numeric).cloned())
                .unwrap_or_else(|| raw.to_string()),
        });
        if let Some(target) = &target {
            action
                .parameters
                .insert(PARAM_TARGET.to_string(), Value::String(target.clone()));
        }
        button.target_page_id = target;
    }
    button.semantic_action = Some(action);
}

/// Inserts a `resources` row and returns its id.
fn insert_resource(connection: &Connection, rid: &str, name: &str, kind: i64) -> Result<i64> {
    connection.execute(
        "INSERT INTO resources (rid, name, type) VALUES (?1, ?2, ?3)",
        params![rid, name, kind],
    )?;
    Ok(connection.last_insert_rowid())
}

fn insert_style(connection: &Connection, style: &Style) -> Result<i64> {
    connection.execute(
        "INSERT INTO button_styles (body_color, border_color, font_color, font_name, font_height) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            color_to_db(style.background_color),
            color_to_db(style.border_color),
            color_to_db(style.font_color),
            style.font_family,
            style.font_size.map(f64::from),
        ],
    )?;
    Ok(connection.last_insert_rowid())
}

/// Cell locations for a page's buttons. Explicit positions win; the rest fill
/// the free cells in order.
fn locations(page: &Page, columns: u32) -> Vec<u32> {
    let mut used: BTreeSet<u32> = page
        .buttons
        .iter()
        .filter_map(|button| button.position)
        .filter(|(x, _)| *x < columns)
        .map(|(x, y)| y * columns + x)
        .collect();
    let mut next = 0;
    page.buttons
        .iter()
        .map(|button| match button.position {
            Some((x, y)) if x < columns => y * columns + x,
            _ => {
                while used.contains(&next) {
                    next += 1;
                }
                used.insert(next);
                next
            }
        })
        .collect()
}

fn write_database(connection: &mut Connection, tree: &Tree, default_grid: GridLayout) -> Result<()> {
    connection.execute_batch(SCHEMA)?;
    let tx = connection.transaction()?;

    let mut numeric_ids: HashMap<&str, i64> = HashMap::new();
    for (index, page) in tree.pages().enumerate() {
        let numeric = index as i64 + 1;
        let resource = insert_resource(&tx, &page.id, &page.name, RESOURCE_PAGE)?;
        let style = match page.style.as_ref().filter(|style| !style.is_empty()) {
            Some(style) => Some(insert_style(&tx, style)?),
            None => None,
        };
        tx.execute(
            "INSERT INTO pages (id, resource_id, button_style_id) VALUES (?1, ?2, ?3)",
            params![numeric, resource, style],
        )?;
        numeric_ids.insert(page.id.as_str(), numeric);
    }
    if let Some(root) = tree.effective_root_id().and_then(|id| numeric_ids.get(id)) {
        tx.execute(
            "INSERT INTO special_pages (name, page_id) VALUES (?1, ?2)",
            params![HOME_PAGE, root],
        )?;
    }

    for page in tree.pages() {
        let grid = page.grid.unwrap_or_else(|| {
            if page.buttons.len() as u32 <= default_grid.rows * default_grid.columns {
                default_grid
            } else {
                GridLayout::fitting(page.buttons.len())
            }
        });
        let columns = grid.columns.max(1);
        tx.execute(
            "INSERT INTO button_boxes (layout_x, layout_y) VALUES (?1, ?2)",
            params![columns, grid.rows],
        )?;
        let button_box = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO button_box_instances (page_id, button_box_id) VALUES (?1, ?2)",
            params![numeric_ids.get(page.id.as_str()), button_box],
        )?;

        for (button, location) in page.buttons.iter().zip(locations(page, columns)) {
            let resource = insert_resource(&tx, &button.id, &button.label, RESOURCE_BUTTON)?;
            let style = match button.style.as_ref().filter(|style| !style.is_empty()) {
                Some(style) => Some(insert_style(&tx, style)?),
                None => None,
            };
            tx.execute(
                "INSERT INTO buttons (resource_id, label, message, button_style_id) VALUES (?1, ?2, ?3, ?4)",
                params![resource, button.label, button.message, style],
            )?;
            tx.execute(
                "INSERT INTO button_box_cells (button_box_id, resource_id, location) VALUES (?1, ?2, ?3)",
                params![button_box, resource, location],
            )?;
            if let Some(vendor) = vendor_action(button, &numeric_ids) {
                write_action(&tx, resource, &vendor)?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

/// Vendor action for a button. Navigation points at the numeric page id when
/// the target is in the tree; other targets are written with the unresolved
/// marker.
fn vendor_action(button: &Button, numeric_ids: &HashMap<&str, i64>) -> Option<Value> {
    if let Some(target) = button.navigation_target() {
        let target = numeric_ids.get(target).map_or_else(
            || format!("{UNRESOLVED_TARGET}{target}"),
            i64::to_string,
        );
        return Some(denormalize(
            &SemanticAction::navigate_to(target),
            Platform::TouchChat,
        ));
    }
    button
        .semantic_action
        .as_ref()
        .map(|action| denormalize(action, Platform::TouchChat))
}

fn write_action(connection: &Connection, resource: i64, vendor: &Value) -> Result<()> {
    let code = vendor.get("code").and_then(Value::as_i64).unwrap_or(-1);
    connection.execute(
        "INSERT INTO actions (resource_id, code, rank) VALUES (?1, ?2, 0)",
        params![resource, code],
    )?;
    let action = connection.last_insert_rowid();
    if let Some(data) = vendor.get("data").and_then(Value::as_object) {
        for (key, value) in data {
            let Ok(key) = key.parse::<i64>() else {
                continue;
            };
            let value = match value {
                Value::String(text) => Some(text.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            };
            connection.execute(
                "INSERT INTO action_data (action_id, key, value) VALUES (?1, ?2, ?3)",
                params![action, key, value],
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_positions_keep_their_cells() {
        let mut placed = Button::speak("b1", "One");
        placed.position = Some((0, 0));
        let page = Page::new("home", "Home")
            .with_button(Button::speak("b0", "Zero"))
            .with_button(placed);
        assert_eq!(locations(&page, 3), vec![1, 0]);
    }

    #[test]
    fn dangling_navigation_keeps_raw_target() {
        let ids: HashMap<&str, i64> = HashMap::from([("food", 2)]);
        let known = vendor_action(&Button::navigate("b1", "Food", "food"), &ids).expect("action");
        assert_eq!(known["data"]["0"], "2");
        let missing = vendor_action(&Button::navigate("b2", "Gone", "gone"), &ids).expect("action");
        assert_eq!(missing["data"]["0"], "rid:gone");
        assert_eq!(vendor_action(&Button::speak("b3", "Hi"), &ids), None);
    }

    #[test]
    fn unresolved_numeric_target_does_not_become_a_page_link() {
        let page_ids: HashMap<i64, String> = HashMap::from([(3, "drinks".to_string())]);
        let ids: HashMap<&str, i64> = HashMap::from([("drinks", 3)]);

        let ghost = vendor_action(&Button::navigate("b1", "Ghost", "3"), &ids).expect("action");
        let mut button = Button::speak("b1", "Ghost");
        apply_action(&mut button, &ghost, &page_ids);
        assert_eq!(button.target_page_id.as_deref(), Some("3"));

        let foreign = serde_json::json!({"code": 9, "data": {"0": "3"}});
        let mut linked = Button::speak("b2", "Drinks");
        apply_action(&mut linked, &foreign, &page_ids);
        assert_eq!(linked.target_page_id.as_deref(), Some("drinks"));
    }

    #[test]
    fn repeated_page_rid_is_rejected() {
        let db = ScopedDatabase::create().expect("db");
        db.connection.execute_batch(SCHEMA).expect("schema");
        db.connection
            .execute_batch(
                "INSERT INTO resources VALUES (1, 'home', 'Home', 1);
                 INSERT INTO resources VALUES (2, 'home', 'Home again', 1);
                 INSERT INTO pages VALUES (1, 1, NULL);
                 INSERT INTO pages VALUES (2, 2, NULL);",
            )
            .expect("rows");
        let err = load_database(&db.connection).expect_err("repeated rid");
        assert!(matches!(err, ProcessorError::DuplicateId(id) if id == "home"));
    }

    #[test]
    fn archive_without_database_is_a_load_error() {
        let bytes = write_entries([&ArchiveEntry::new("readme.txt", b"hello".to_vec())])
            .expect("zip");
        let err = TouchChatProcessor::default()
            .load_into_tree(Source::Bytes(&bytes))
            .expect_err("no database");
        assert!(matches!(err, ProcessorError::Load { format: "touchchat", .. }));
    }
}
