//! Snap page sets (`.sps`, `.spb`): a SQLite database.
//!
//! Tables and columns are discovered at runtime; anything absent reads as
//! empty. Images and recorded messages live in the content-addressed
//! `PageSetData` table, deduplicated by hash with a reference count.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rusqlite::{Connection, params};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::aac::processors::action::{Platform, SemanticAction, denormalize, normalize};
use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::io::sqlite::{
    Schema, ScopedDatabase, is_empty_file, open_read_only, translate_columns,
};
use crate::aac::processors::io::{BoardFormat, BoardProcessor, Source, write_output};
use crate::aac::processors::model::{
    AUDIO_ID_PREFIX, AudioRecording, Button, ButtonType, GridLayout, Page, Tree,
};
use crate::aac::processors::resource::{
    BlobStore, BlobTableResolver, ChainResolver, EntryToken, IMAGE_ID_PREFIX, NoResources,
    ResourceResolver, SymbolLibraryResolver,
};
use crate::aac::processors::style::{Color, Style};
use crate::aac::processors::translate::TranslationMap;

const FORMAT: &str = "snap";

const SCHEMA: &str = r#"
CREATE TABLE PageSetProperties (
    Id INTEGER PRIMARY KEY,
    DefaultHomePageUniqueId TEXT,
    FriendlyName TEXT,
    Language TEXT
);
CREATE TABLE Page (
    Id INTEGER PRIMARY KEY,
    UniqueId TEXT NOT NULL UNIQUE,
    Title TEXT,
    GridDimension TEXT,
    BackgroundColor INTEGER,
    ParentPageUniqueId TEXT
);
CREATE TABLE ElementReference (
    Id INTEGER PRIMARY KEY,
    PageId INTEGER NOT NULL,
    BackgroundColor INTEGER,
    ForegroundColor INTEGER,
    BorderColor INTEGER,
    FontFamily TEXT,
    FontSize REAL
);
CREATE TABLE ElementPlacement (
    Id INTEGER PRIMARY KEY,
    ElementReferenceId INTEGER NOT NULL,
    GridPosition TEXT
);
CREATE TABLE Button (
    Id INTEGER PRIMARY KEY,
    ElementReferenceId INTEGER NOT NULL,
    UniqueId TEXT,
    Label TEXT,
    Message TEXT,
    NavigatePageUniqueId TEXT,
    PageSetImageId INTEGER,
    MessageRecordingId INTEGER,
    SerializedMessageSoundMetadata TEXT,
    UseMessageRecording INTEGER
);
CREATE TABLE CommandSequence (
    Id INTEGER PRIMARY KEY,
    ButtonId INTEGER NOT NULL,
    SerializedCommands TEXT
);
CREATE TABLE PageSetData (
    Id INTEGER PRIMARY KEY,
    Identifier TEXT NOT NULL UNIQUE,
    Data BLOB,
    RefCount INTEGER NOT NULL DEFAULT 1
);
"#;

/// Text columns rewritten by [`SnapProcessor::process_texts`].
const TEXT_COLUMNS: &[(&str, &str)] = &[
    ("PageSetProperties", "FriendlyName"),
    ("Page", "Title"),
    ("Button", "Label"),
    ("Button", "Message"),
];

/// Reads and writes Snap page-set databases.
#[derive(Debug, Clone, Default)]
pub struct SnapProcessor {
    settings: Settings,
}

impl SnapProcessor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl BoardProcessor for SnapProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn extensions(&self) -> &'static [&'static str] {
        BoardFormat::Snap.extensions()
    }

    fn load_into_tree(&self, source: Source<'_>) -> Result<Tree> {
        match source {
            Source::Path(path) => {
                if is_empty_file(path)? {
                    return Ok(Tree::new());
                }
                let connection = open_read_only(FORMAT, path)?;
                load_database(&connection)
            }
            Source::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Ok(Tree::new());
                }
                let db = ScopedDatabase::materialize(FORMAT, bytes)?;
                load_database(&db.connection)
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn save_with_resources(
        &self,
        tree: &Tree,
        resources: &dyn ResourceResolver,
        destination: &Path,
    ) -> Result<()> {
        let mut db = ScopedDatabase::create()?;
        write_database(&mut db.connection, tree, resources)?;
        let bytes = db.into_bytes()?;
        write_output(destination, &bytes)?;
        info!(pages = tree.len(), bytes = bytes.len(), "wrote snap page set");
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

        let mut db = ScopedDatabase::materialize(FORMAT, &bytes)?;
        let updated = translate_columns(&mut db.connection, TEXT_COLUMNS, translations)?;
        if let Some(lang) = translations.target_lang() {
            let schema = Schema::introspect(&db.connection)?;
            if schema.has_column("PageSetProperties", "Language") {
                db.connection
                    .execute("UPDATE PageSetProperties SET Language = ?1", [lang])?;
            }
        }

        let output = db.into_bytes()?;
        write_output(destination, &output)?;
        info!(updated, "translated snap page set");
        Ok(output)
    }

    fn open_resources(&self, source: Source<'_>) -> Result<Box<dyn ResourceResolver>> {
        let blobs: Box<dyn ResourceResolver> = match source {
            Source::Path(path) => {
                if is_empty_file(path)? {
                    Box::new(NoResources)
                } else {
                    let connection = open_read_only(FORMAT, path)?;
                    Box::new(BlobTableResolver::new(connection, None, "PageSetData", "Id", "Data"))
                }
            }
            Source::Bytes(bytes) if bytes.is_empty() => Box::new(NoResources),
            Source::Bytes(bytes) => {
                let (connection, file) = ScopedDatabase::materialize(FORMAT, bytes)?.into_parts();
                Box::new(BlobTableResolver::new(
                    connection,
                    Some(file),
                    "PageSetData",
                    "Id",
                    "Data",
                ))
            }
        };
        Ok(Box::new(ChainResolver::new(vec![
            blobs,
            Box::new(SymbolLibraryResolver::new(&self.settings.symbol_libraries)),
        ])))
    }
}

struct ButtonRow {
    id: i64,
    unique_id: Option<String>,
    label: Option<String>,
    message: Option<String>,
    navigate_to: Option<String>,
    image_id: Option<i64>,
    recording_id: Option<i64>,
    sound_metadata: Option<String>,
    page_id: i64,
    background: Option<i64>,
    foreground: Option<i64>,
    border: Option<i64>,
    font_family: Option<String>,
    font_size: Option<f64>,
    position: Option<String>,
}

fn color_from_db(value: Option<i64>) -> Option<Color> {
    value.map(|argb| Color::from_argb(argb as u32))
}

fn color_to_db(color: Option<Color>) -> Option<i64> {
    color.map(|color| i64::from(color.to_argb()))
}

/// Parses `"a,b"` into a pair of integers.
fn parse_pair(raw: &str) -> Option<(u32, u32)> {
    let (a, b) = raw.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

fn load_database(connection: &Connection) -> Result<Tree> {
    let schema = Schema::introspect(connection)?;
    let mut tree = Tree::new();
    if !schema.has_table("Page") {
        warn!("page set has no Page table");
        return Ok(tree);
    }

    if schema.has_table("PageSetProperties") {
        let columns = schema.select_list(
            "PageSetProperties",
            &["DefaultHomePageUniqueId", "FriendlyName", "Language"],
        );
        let mut statement =
            connection.prepare(&format!("SELECT {columns} FROM PageSetProperties LIMIT 1"))?;
        let mut rows = statement.query([])?;
        if let Some(row) = rows.next()? {
            tree.root_id = row.get(0)?;
            tree.metadata.name = row.get(1)?;
            tree.metadata.language = row.get(2)?;
        }
    }

    let columns = schema.select_list(
        "Page",
        &["Id", "UniqueId", "Title", "GridDimension", "BackgroundColor", "ParentPageUniqueId"],
    );
    let mut page_ids: HashMap<i64, String> = HashMap::new();
    let mut pages: BTreeMap<String, Page> = BTreeMap::new();
    {
        let mut statement = connection.prepare(&format!("SELECT {columns} FROM Page"))?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get::<_, Option<i64>>(0)?.unwrap_or_default();
            let unique: String = row
                .get::<_, Option<String>>(1)?
                .unwrap_or_else(|| id.to_string());
            let mut page = Page::new(unique.clone(), row.get::<_, Option<String>>(2)?.unwrap_or_default());
            page.grid = row
                .get::<_, Option<String>>(3)?
                .as_deref()
                .and_then(parse_pair)
                .map(|(columns, rows)| GridLayout::new(rows, columns));
            page.style = color_from_db(row.get(4)?).map(Style::from_background);
            page.parent_id = row.get(5)?;
            page_ids.insert(id, unique.clone());
            if pages.insert(unique.clone(), page).is_some() {
                return Err(ProcessorError::DuplicateId(unique));
            }
        }
    }

    let commands = load_commands(connection, &schema)?;
    let blobs = load_blobs(connection, &schema)?;
    for row in load_button_rows(connection, &schema)? {
        let Some(page) = page_ids.get(&row.page_id).and_then(|id| pages.get_mut(id)) else {
            debug!(button = row.id, page = row.page_id, "button on unknown page");
            continue;
        };
        page.buttons.push(build_button(row, &commands, &blobs));
    }

    for page in pages.into_values() {
        tree.add_page(page)?;
    }
    debug!(pages = tree.len(), "loaded snap page set");
    Ok(tree)
}

fn load_button_rows(connection: &Connection, schema: &Schema) -> Result<Vec<ButtonRow>> {
    if !schema.has_column("Button", "ElementReferenceId")
        || !schema.has_column("ElementReference", "PageId")
    {
        return Ok(Vec::new());
    }
    let b = |column: &str| qualified(schema, "b", "Button", column);
    let er = |column: &str| qualified(schema, "er", "ElementReference", column);
    let position = if schema.has_column("ElementPlacement", "GridPosition")
        && schema.has_column("ElementPlacement", "ElementReferenceId")
    {
        "(SELECT ep.\"GridPosition\" FROM ElementPlacement ep WHERE ep.\"ElementReferenceId\" = er.\"Id\" LIMIT 1)".to_string()
    } else {
        "NULL".to_string()
    };

    let sql = format!(
        "SELECT b.\"Id\", {}, {}, {}, {}, {}, {}, {}, er.\"PageId\", {}, {}, {}, {}, {}, {position} \
         FROM Button b JOIN ElementReference er ON b.\"ElementReferenceId\" = er.\"Id\" \
         ORDER BY er.\"PageId\", b.\"Id\"",
        b("UniqueId"),
        b("Label"),
        b("Message"),
        b("NavigatePageUniqueId"),
        b("PageSetImageId"),
        b("MessageRecordingId"),
        b("SerializedMessageSoundMetadata"),
        er("BackgroundColor"),
        er("ForegroundColor"),
        er("BorderColor"),
        er("FontFamily"),
        er("FontSize"),
    );

    let mut statement = connection.prepare(&sql)?;
    let rows = statement
        .query_map([], |row| {
            Ok(ButtonRow {
                id: row.get(0)?,
                unique_id: row.get(1)?,
                label: row.get(2)?,
                message: row.get(3)?,
                navigate_to: row.get(4)?,
                image_id: row.get(5)?,
                recording_id: row.get(6)?,
                sound_metadata: row.get(7)?,
                page_id: row.get(8)?,
                background: row.get(9)?,
                foreground: row.get(10)?,
                border: row.get(11)?,
                font_family: row.get(12)?,
                font_size: row.get(13)?,
                position: row.get(14)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn qualified(schema: &Schema, alias: &str, table: &str, column: &str) -> String {
    if schema.has_column(table, column) {
        format!("{alias}.\"{column}\"")
    } else {
        "NULL".to_string()
    }
}

fn load_commands(connection: &Connection, schema: &Schema) -> Result<HashMap<i64, Vec<Value>>> {
    let mut commands: HashMap<i64, Vec<Value>> = HashMap::new();
    if !schema.has_column("CommandSequence", "ButtonId")
        || !schema.has_column("CommandSequence", "SerializedCommands")
    {
        return Ok(commands);
    }
    let mut statement = connection
        .prepare("SELECT ButtonId, SerializedCommands FROM CommandSequence ORDER BY Id")?;
    let rows = statement
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (button, serialized) in rows {
        let Some(serialized) = serialized else {
            continue;
        };
        match serde_json::from_str::<Value>(&serialized) {
            Ok(Value::Array(items)) => commands.entry(button).or_default().extend(items),
            Ok(item @ Value::Object(_)) => commands.entry(button).or_default().push(item),
            Ok(_) => {}
            Err(err) => debug!(button, error = %err, "unreadable command sequence"),
        }
    }
    Ok(commands)
}

fn load_blobs(connection: &Connection, schema: &Schema) -> Result<HashMap<i64, (String, Vec<u8>)>> {
    let mut blobs = HashMap::new();
    if !schema.has_table("PageSetData") {
        return Ok(blobs);
    }
    let columns = schema.select_list("PageSetData", &["Id", "Identifier", "Data"]);
    let mut statement = connection.prepare(&format!("SELECT {columns} FROM PageSetData"))?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let Some(id) = row.get::<_, Option<i64>>(0)? else {
            continue;
        };
        let data: Vec<u8> = row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default();
        let identifier = row
            .get::<_, Option<String>>(1)?
            .unwrap_or_else(|| AudioRecording::identifier_for(&data));
        blobs.insert(id, (identifier, data));
    }
    Ok(blobs)
}

fn build_button(
    row: ButtonRow,
    commands: &HashMap<i64, Vec<Value>>,
    blobs: &HashMap<i64, (String, Vec<u8>)>,
) -> Button {
    let label = row.label.unwrap_or_default();
    let mut button = Button::speak(row.unique_id.unwrap_or_else(|| row.id.to_string()), label);
    if let Some(message) = row.message.filter(|message| !message.is_empty()) {
        button.message = message;
    }
    button.position = row.position.as_deref().and_then(parse_pair);

    let first_command = commands.get(&row.id).and_then(|list| list.first());
    if let Some(vendor) = first_command {
        let action = normalize(vendor, Platform::Snap);
        button.action = vendor
            .get("$type")
            .and_then(Value::as_str)
            .map(str::to_string);
        button.button_type = ButtonType::for_intent(action.intent);
        button.target_page_id = action.target().map(str::to_string);
        button.semantic_action = Some(action);
    }
    if let Some(target) = row.navigate_to.filter(|target| !target.is_empty()) {
        button.button_type = ButtonType::Navigate;
        if button.semantic_action.is_none() {
            button.semantic_action = Some(SemanticAction::navigate_to(target.clone()));
        }
        button.target_page_id = Some(target);
    }

    let style = Style {
        background_color: color_from_db(row.background),
        font_color: color_from_db(row.foreground),
        border_color: color_from_db(row.border),
        font_family: row.font_family,
        font_size: row.font_size.map(|size| size as f32),
        ..Style::default()
    };
    button.style = (!style.is_empty()).then_some(style);

    button.image = row.image_id.map(|id| EntryToken::blob_row(id).to_string());
    if let Some((identifier, data)) = row.recording_id.and_then(|id| blobs.get(&id)) {
        button.audio = Some(AudioRecording {
            id: row.recording_id,
            data: data.clone(),
            identifier: identifier.clone(),
            metadata: row.sound_metadata,
        });
    }
    button
}

/// Blob identifiers a button points at once media has been stored.
#[derive(Default)]
struct ButtonMedia {
    image: Option<String>,
    audio: Option<String>,
}

fn write_database(
    connection: &mut Connection,
    tree: &Tree,
    resources: &dyn ResourceResolver,
) -> Result<()> {
    connection.execute_batch(SCHEMA)?;

    // First pass: collect media so identical bytes share one row.
    let mut store = BlobStore::new();
    let mut media: HashMap<(&str, usize), ButtonMedia> = HashMap::new();
    for page in tree.pages() {
        for (index, button) in page.buttons.iter().enumerate() {
            let mut entry = ButtonMedia::default();
            if let Some(audio) = button.audio.as_ref().filter(|audio| !audio.data.is_empty()) {
                entry.audio = Some(store.attach(AUDIO_ID_PREFIX, &audio.data));
            }
            if let Some(token) = button.image.as_deref().and_then(EntryToken::parse) {
                if let Some(data) = resources.fetch(&token)? {
                    entry.image = Some(store.attach(IMAGE_ID_PREFIX, &data));
                }
            }
            media.insert((page.id.as_str(), index), entry);
        }
    }

    let tx = connection.transaction()?;
    let mut blob_rows: HashMap<&str, i64> = HashMap::new();
    for (row, (identifier, blob)) in store.iter().enumerate() {
        let row = row as i64 + 1;
        tx.execute(
            "INSERT INTO PageSetData (Id, Identifier, Data, RefCount) VALUES (?1, ?2, ?3, ?4)",
            params![row, identifier, blob.data, blob.ref_count],
        )?;
        blob_rows.insert(identifier, row);
    }

    tx.execute(
        "INSERT INTO PageSetProperties (Id, DefaultHomePageUniqueId, FriendlyName, Language) VALUES (1, ?1, ?2, ?3)",
        params![
            tree.effective_root_id(),
            tree.metadata.name,
            tree.metadata.language
        ],
    )?;

    let mut element_id = 0i64;
    let mut button_id = 0i64;
    for (page_index, page) in tree.pages().enumerate() {
        let page_row = page_index as i64 + 1;
        let dimension = page
            .grid
            .map(|grid| format!("{},{}", grid.columns, grid.rows));
        let background = color_to_db(page.style.as_ref().and_then(|style| style.background_color));
        tx.execute(
            "INSERT INTO Page (Id, UniqueId, Title, GridDimension, BackgroundColor, ParentPageUniqueId) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![page_row, page.id, page.name, dimension, background, page.parent_id],
        )?;

        for (index, button) in page.buttons.iter().enumerate() {
            element_id += 1;
            button_id += 1;
            let style = button.style.clone().unwrap_or_default();
            tx.execute(
                "INSERT INTO ElementReference (Id, PageId, BackgroundColor, ForegroundColor, BorderColor, FontFamily, FontSize) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    element_id,
                    page_row,
                    color_to_db(style.background_color),
                    color_to_db(style.font_color),
                    color_to_db(style.border_color),
                    style.font_family,
                    style.font_size.map(f64::from),
                ],
            )?;
            if let Some((x, y)) = button.position {
                tx.execute(
                    "INSERT INTO ElementPlacement (ElementReferenceId, GridPosition) VALUES (?1, ?2)",
                    params![element_id, format!("{x},{y}")],
                )?;
            }

            let entry = media.get(&(page.id.as_str(), index));
            let image_row = entry
                .and_then(|entry| entry.image.as_deref())
                .and_then(|id| blob_rows.get(id).copied());
            let audio_row = entry
                .and_then(|entry| entry.audio.as_deref())
                .and_then(|id| blob_rows.get(id).copied());
            let metadata = button.audio.as_ref().and_then(|audio| audio.metadata.clone());
            tx.execute(
                "INSERT INTO Button (Id, ElementReferenceId, UniqueId, Label, Message, NavigatePageUniqueId, PageSetImageId, MessageRecordingId, SerializedMessageSoundMetadata, UseMessageRecording) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    button_id,
                    element_id,
                    button.id,
                    button.label,
                    button.message,
                    button.navigation_target(),
                    image_row,
                    audio_row,
                    metadata,
                    audio_row.is_some(),
                ],
            )?;

            if let Some(commands) = command_sequence(button) {
                tx.execute(
                    "INSERT INTO CommandSequence (ButtonId, SerializedCommands) VALUES (?1, ?2)",
                    params![button_id, commands],
                )?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

/// Serialized commands for a button. Navigation is rebuilt from the current
/// target; other actions go through the normalizer.
fn command_sequence(button: &Button) -> Option<String> {
    let command = match (button.navigation_target(), &button.semantic_action) {
        (Some(target), _) => denormalize(&SemanticAction::navigate_to(target), Platform::Snap),
        (None, Some(action)) => denormalize(action, Platform::Snap),
        (None, None) => return None,
    };
    Some(Value::Array(vec![command]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_parse_with_spaces() {
        assert_eq!(parse_pair("3, 4"), Some((3, 4)));
        assert_eq!(parse_pair("3"), None);
    }

    #[test]
    fn argb_columns_round_trip() {
        let color = Color::rgba(0x11, 0x22, 0x33, 0x44);
        assert_eq!(color_from_db(color_to_db(Some(color))), Some(color));
    }

    #[test]
    fn navigation_commands_use_current_target() {
        let mut button = Button::navigate("b1", "Food", "food");
        button.target_page_id = Some("renamed".into());
        let commands = command_sequence(&button).expect("commands");
        let value: Value = serde_json::from_str(&commands).expect("json");
        assert_eq!(value[0]["LinkedPageId"], "renamed");
        assert_eq!(command_sequence(&Button::speak("b2", "Hi")), None);
    }

    #[test]
    fn older_schemas_without_media_tables_still_load() {
        let db = ScopedDatabase::create().expect("db");
        db.connection
            .execute_batch(
                "CREATE TABLE Page (Id INTEGER PRIMARY KEY, UniqueId TEXT, Title TEXT);
                 CREATE TABLE ElementReference (Id INTEGER PRIMARY KEY, PageId INTEGER);
                 CREATE TABLE Button (Id INTEGER PRIMARY KEY, ElementReferenceId INTEGER, Label TEXT);
                 INSERT INTO Page VALUES (1, 'home', 'Home');
                 INSERT INTO ElementReference VALUES (1, 1);
                 INSERT INTO Button VALUES (1, 1, 'Hello');",
            )
            .expect("schema");
        let tree = load_database(&db.connection).expect("load");
        let home = tree.get_page("home").expect("home page");
        assert_eq!(home.buttons.len(), 1);
        assert_eq!(home.buttons[0].label, "Hello");
        assert_eq!(home.buttons[0].message, "Hello");
        assert!(home.buttons[0].audio.is_none());
    }

    #[test]
    fn null_unique_id_clashing_with_another_page_is_rejected() {
        let db = ScopedDatabase::create().expect("db");
        db.connection
            .execute_batch(
                "CREATE TABLE Page (Id INTEGER PRIMARY KEY, UniqueId TEXT, Title TEXT);
                 INSERT INTO Page VALUES (1, '2', 'Home');
                 INSERT INTO Page VALUES (2, NULL, 'Food');",
            )
            .expect("schema");
        let err = load_database(&db.connection).expect_err("clashing ids");
        assert!(matches!(err, ProcessorError::DuplicateId(id) if id == "2"));
    }
}
