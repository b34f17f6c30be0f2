//! Open Board Format: single JSON boards (`.obf`) and zipped board sets
//! (`.obz`) with a `manifest.json` naming the root board and every file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aac::processors::action::{
    ActionIntent, PARAM_PATH, PARAM_TARGET, Platform, SemanticAction, denormalize, normalize,
};
use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::io::archive::{
    ArchiveEntry, find_entry, read_entries, write_entries,
};
use crate::aac::processors::io::{BoardFormat, BoardProcessor, Source, write_output};
use crate::aac::processors::model::{
    AudioRecording, Button, ButtonType, GridLayout, Page, Tree, sha1_hex,
};
use crate::aac::processors::resource::{
    ArchiveResolver, ChainResolver, DataUriResolver, EntryToken, ResourceResolver,
    SymbolLibraryResolver,
};
use crate::aac::processors::style::{Color, Style};
use crate::aac::processors::text::{Casing, to_case};
use crate::aac::processors::translate::TranslationMap;

const FORMAT: &str = "obf";
const FORMAT_VERSION: &str = "open-board-0.1";
const MANIFEST_ENTRY: &str = "manifest.json";
const BOARD_EXTENSION: &str = ".obf";

/// Reads and writes Open Board Format files.
#[derive(Debug, Clone, Default)]
pub struct ObfProcessor {
    settings: Settings,
}

impl ObfProcessor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

fn is_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06")
}

impl BoardProcessor for ObfProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn extensions(&self) -> &'static [&'static str] {
        BoardFormat::Obf.extensions()
    }

    fn load_into_tree(&self, source: Source<'_>) -> Result<Tree> {
        let bytes = source.read()?;
        if bytes.is_empty() {
            return Ok(Tree::new());
        }
        let mut tree = if is_archive(&bytes) {
            load_package(&bytes)?
        } else {
            let board = parse_board(&bytes)?;
            let mut tree = Tree::new();
            let page = board_to_page(&board, &BoardLinks::default(), None)?;
            apply_board_metadata(&mut tree, &board);
            tree.root_id = Some(page.id.clone());
            tree.add_page(page)?;
            tree
        };
        if tree.metadata.language.is_none() {
            tree.metadata.language = self.settings.default_language.clone();
        }
        debug!(pages = tree.len(), "loaded open board");
        Ok(tree)
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn save_with_resources(
        &self,
        tree: &Tree,
        resources: &dyn ResourceResolver,
        destination: &Path,
    ) -> Result<()> {
        let package = destination
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("obz"));
        let writer = BoardWriter::new(tree, resources, self.settings.default_grid(), package);
        let bytes = if package {
            writer.package()?
        } else {
            writer.single()?
        };
        write_output(destination, &bytes)?;
        info!(pages = tree.len(), bytes = bytes.len(), package, "wrote open board");
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

        let mut updated = 0;
        let output = if is_archive(&bytes) {
            let mut entries = read_entries(FORMAT, &bytes)?;
            for entry in &mut entries {
                if entry.name.to_ascii_lowercase().ends_with(BOARD_EXTENSION) {
                    let mut board = Value::Object(parse_board(&entry.data)?);
                    updated += translate_board(&mut board, translations);
                    entry.data = to_json_bytes(&board)?;
                }
            }
            write_entries(&entries)?
        } else {
            let mut board = Value::Object(parse_board(&bytes)?);
            updated += translate_board(&mut board, translations);
            to_json_bytes(&board)?
        };

        write_output(destination, &output)?;
        info!(updated, "translated open board");
        Ok(output)
    }

    fn open_resources(&self, source: Source<'_>) -> Result<Box<dyn ResourceResolver>> {
        let bytes = source.read()?;
        let mut chain = ChainResolver::new(vec![Box::new(DataUriResolver)]);
        if is_archive(&bytes) {
            chain.push(Box::new(ArchiveResolver::new(bytes.into_owned())?));
        }
        chain.push(Box::new(SymbolLibraryResolver::new(
            &self.settings.symbol_libraries,
        )));
        Ok(Box::new(chain))
    }
}

fn parse_board(bytes: &[u8]) -> Result<Map<String, Value>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(board)) => Ok(board),
        Ok(_) => Err(ProcessorError::load(FORMAT, "board is not a JSON object")),
        Err(err) => Err(ProcessorError::load(FORMAT, format!("board is not valid JSON: {err}"))),
    }
}

fn to_json_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Strings and numbers both show up as ids in the wild.
fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn id_field(value: &Value, key: &str) -> Option<String> {
    id_value(value.get(key))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Id of a board, or a stable surrogate derived from its content.
fn board_id(board: &Map<String, Value>) -> String {
    if let Some(id) = id_value(board.get("id")) {
        return id;
    }
    let canonical = serde_json::to_string(board).unwrap_or_default();
    format!("board_{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical.as_bytes()).simple())
}

fn apply_board_metadata(tree: &mut Tree, board: &Map<String, Value>) {
    let text = |key: &str| board.get(key).and_then(Value::as_str).map(str::to_string);
    tree.metadata.name = text("name");
    tree.metadata.description = text("description_html");
    tree.metadata.language = text("locale");
}

/// What a board needs from its package to resolve references.
#[derive(Default)]
struct BoardLinks<'a> {
    /// Board path → board id.
    board_ids: HashMap<String, String>,
    entries: &'a [ArchiveEntry],
}

fn load_package(bytes: &[u8]) -> Result<Tree> {
    let entries = read_entries(FORMAT, bytes)?;
    let manifest = match find_entry(&entries, MANIFEST_ENTRY) {
        Some(entry) => Value::Object(parse_board(&entry.data)?),
        None => {
            warn!("board set has no manifest, scanning for boards");
            Value::Null
        }
    };

    let mut board_paths: Vec<String> = manifest
        .pointer("/paths/boards")
        .and_then(Value::as_object)
        .map(|boards| boards.values().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if board_paths.is_empty() {
        board_paths = entries
            .iter()
            .filter(|entry| entry.name.to_ascii_lowercase().ends_with(BOARD_EXTENSION))
            .map(|entry| entry.name.clone())
            .collect();
    }
    board_paths.sort();
    board_paths.dedup();

    let mut boards = Vec::new();
    let mut links = BoardLinks {
        board_ids: HashMap::new(),
        entries: &entries,
    };
    for path in board_paths {
        let Some(entry) = find_entry(&entries, &path) else {
            debug!(path = %path, "manifest names a missing board");
            continue;
        };
        let board = parse_board(&entry.data)?;
        links.board_ids.insert(path.clone(), board_id(&board));
        boards.push((path, board));
    }

    let mut tree = Tree::new();
    let root_path = str_field(&manifest, "root").map(str::to_string);
    for (path, board) in &boards {
        let page = board_to_page(board, &links, Some(path))?;
        if root_path.as_deref() == Some(path.as_str()) {
            apply_board_metadata(&mut tree, board);
            tree.root_id = Some(page.id.clone());
        }
        tree.add_page(page)?;
    }
    Ok(tree)
}

/// Joins a reference relative to the board's directory, as package paths are.
fn package_path(board_path: Option<&str>, reference: &str) -> String {
    let reference = reference.trim_start_matches("./");
    match board_path.and_then(|path| path.rsplit_once('/')) {
        Some((dir, _)) if !reference.contains('/') => format!("{dir}/{reference}"),
        _ => reference.to_string(),
    }
}

fn board_to_page(
    board: &Map<String, Value>,
    links: &BoardLinks<'_>,
    board_path: Option<&str>,
) -> Result<Page> {
    let id = board_id(board);
    let name = board.get("name").and_then(Value::as_str).unwrap_or(&id);
    let mut page = Page::new(id.clone(), name);

    let grid = board.get("grid");
    let rows = grid.and_then(|grid| grid.get("rows")).and_then(Value::as_u64);
    let columns = grid.and_then(|grid| grid.get("columns")).and_then(Value::as_u64);
    if let (Some(rows), Some(columns)) = (rows, columns) {
        page.grid = Some(GridLayout::new(rows as u32, columns as u32));
    }
    let mut positions: HashMap<String, (u32, u32)> = HashMap::new();
    if let Some(order) = grid.and_then(|grid| grid.get("order")).and_then(Value::as_array) {
        for (y, row) in order.iter().enumerate() {
            for (x, cell) in row.as_array().into_iter().flatten().enumerate() {
                let cell_id = match cell {
                    Value::String(text) => text.clone(),
                    Value::Number(number) => number.to_string(),
                    _ => continue,
                };
                positions.entry(cell_id).or_insert((x as u32, y as u32));
            }
        }
    }

    let by_id = |key: &str| -> HashMap<String, Value> {
        board
            .get(key)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| Some((id_field(item, "id")?, item.clone())))
            .collect()
    };
    let images = by_id("images");
    let sounds = by_id("sounds");

    let buttons = board.get("buttons").and_then(Value::as_array);
    for (index, raw) in buttons.into_iter().flatten().enumerate() {
        if !raw.is_object() {
            continue;
        }
        let button_id = id_field(raw, "id").unwrap_or_else(|| format!("{id}_{index}"));
        let mut button = Button::speak(button_id.clone(), str_field(raw, "label").unwrap_or_default());
        if let Some(vocalization) = str_field(raw, "vocalization").filter(|text| !text.is_empty()) {
            button.message = vocalization.to_string();
        }
        button.position = positions.get(&button_id).copied();

        let style = Style {
            background_color: str_field(raw, "background_color").and_then(Color::parse),
            border_color: str_field(raw, "border_color").and_then(Color::parse),
            ..Style::default()
        };
        button.style = (!style.is_empty()).then_some(style);

        apply_action(&mut button, raw, links, board_path);

        if let Some(image) = id_field(raw, "image_id").and_then(|image| images.get(&image)) {
            button.image = image_token(image, links, board_path);
        }
        if let Some(sound) = id_field(raw, "sound_id").and_then(|sound| sounds.get(&sound)) {
            button.audio = sound_recording(sound, links, board_path);
        }
        page.buttons.push(button);
    }
    Ok(page)
}

fn apply_action(button: &mut Button, raw: &Value, links: &BoardLinks<'_>, board_path: Option<&str>) {
    let mut vendor = Map::new();
    for key in ["load_board", "action"] {
        if let Some(value) = raw.get(key) {
            vendor.insert(key.to_string(), value.clone());
        }
    }
    if vendor.is_empty() {
        return;
    }
    button.action = str_field(raw, "action").map(str::to_string);
    let mut action = normalize(&Value::Object(vendor), Platform::Obf);
    button.button_type = ButtonType::for_intent(action.intent);

    if action.intent == ActionIntent::NavigateTo {
        let by_path = raw
            .pointer("/load_board/path")
            .and_then(Value::as_str)
            .map(|path| package_path(board_path, path))
            .and_then(|path| links.board_ids.get(&path).cloned());
        let target = action.target().map(str::to_string).or(by_path);
        if let Some(target) = &target {
            action
                .parameters
                .insert(PARAM_TARGET.to_string(), Value::String(target.clone()));
        }
        button.target_page_id = target;
    }
    button.semantic_action = Some(action);
}

fn image_token(image: &Value, links: &BoardLinks<'_>, board_path: Option<&str>) -> Option<String> {
    if let Some(data) = str_field(image, "data").filter(|data| data.starts_with("data:")) {
        return Some(data.to_string());
    }
    if let Some(path) = str_field(image, "path") {
        let path = package_path(board_path, path);
        if find_entry(links.entries, &path).is_some() || links.entries.is_empty() {
            return Some(path);
        }
    }
    str_field(image, "url").map(str::to_string)
}

fn sound_recording(
    sound: &Value,
    links: &BoardLinks<'_>,
    board_path: Option<&str>,
) -> Option<AudioRecording> {
    let data = str_field(sound, "data")
        .and_then(DataUriResolver::decode)
        .map(|(_, data)| data)
        .or_else(|| {
            let path = package_path(board_path, str_field(sound, "path")?);
            find_entry(links.entries, &path).map(|entry| entry.data.clone())
        })?;
    let mut recording = AudioRecording::new(data);
    recording.metadata = str_field(sound, "content_type").map(str::to_string);
    Some(recording)
}

/// Media type sniffed from the first bytes.
fn media_type(data: &[u8]) -> &'static str {
    if data.starts_with(b"\x89PNG") {
        "image/png"
    } else if data.starts_with(b"\xFF\xD8\xFF") {
        "image/jpeg"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.starts_with(b"<svg") || data.starts_with(b"<?xml") {
        "image/svg+xml"
    } else if data.starts_with(b"RIFF") {
        "audio/wav"
    } else if data.starts_with(b"ID3") || data.starts_with(b"\xFF\xFB") {
        "audio/mpeg"
    } else if data.starts_with(b"OggS") {
        "audio/ogg"
    } else {
        "application/octet-stream"
    }
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "audio/wav" => "wav",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

/// Serializes trees as boards. In a package, media is written once per
/// distinct content; single boards embed it as data URIs.
struct BoardWriter<'a> {
    tree: &'a Tree,
    resources: &'a dyn ResourceResolver,
    default_grid: GridLayout,
    package: bool,
    board_paths: BTreeMap<&'a str, String>,
}

/// Media collected while writing one board.
#[derive(Default)]
struct BoardMedia {
    images: Vec<Value>,
    sounds: Vec<Value>,
    seen: HashSet<String>,
}

impl<'a> BoardWriter<'a> {
    fn new(
        tree: &'a Tree,
        resources: &'a dyn ResourceResolver,
        default_grid: GridLayout,
        package: bool,
    ) -> Self {
        let mut used = HashSet::new();
        let board_paths = tree
            .pages()
            .map(|page| {
                let mut slug: String = to_case(&page.id, Casing::Snake)
                    .chars()
                    .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
                    .collect();
                if slug.is_empty() {
                    slug = "board".to_string();
                }
                let mut path = format!("boards/{slug}{BOARD_EXTENSION}");
                let mut counter = 2;
                while !used.insert(path.to_ascii_lowercase()) {
                    path = format!("boards/{slug}_{counter}{BOARD_EXTENSION}");
                    counter += 1;
                }
                (page.id.as_str(), path)
            })
            .collect();
        Self {
            tree,
            resources,
            default_grid,
            package,
            board_paths,
        }
    }

    /// The root board alone.
    fn single(&self) -> Result<Vec<u8>> {
        let Some(root) = self.tree.effective_root_id().and_then(|id| self.tree.get_page(id)) else {
            return to_json_bytes(&Value::Object(Map::new()));
        };
        if self.tree.len() > 1 {
            warn!(
                dropped = self.tree.len() - 1,
                "a single board holds one page; save as .obz to keep the rest"
            );
        }
        let mut files = BTreeMap::new();
        let board = self.board(root, &mut files)?;
        to_json_bytes(&board)
    }

    fn package(&self) -> Result<Vec<u8>> {
        let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut image_paths = Map::new();
        let mut sound_paths = Map::new();
        let mut boards = Vec::new();
        for page in self.tree.pages() {
            let board = self.board(page, &mut files)?;
            for (list, paths) in [("images", &mut image_paths), ("sounds", &mut sound_paths)] {
                for item in board.get(list).and_then(Value::as_array).into_iter().flatten() {
                    if let (Some(id), Some(path)) = (id_field(item, "id"), str_field(item, "path")) {
                        paths.insert(id, Value::String(path.to_string()));
                    }
                }
            }
            boards.push((self.board_paths[page.id.as_str()].clone(), board));
        }

        let mut board_paths = Map::new();
        for (id, path) in &self.board_paths {
            board_paths.insert(id.to_string(), Value::String(path.clone()));
        }
        let mut paths = Map::new();
        paths.insert("boards".to_string(), Value::Object(board_paths));
        paths.insert("images".to_string(), Value::Object(image_paths));
        paths.insert("sounds".to_string(), Value::Object(sound_paths));

        let mut manifest = Map::new();
        manifest.insert("format".to_string(), Value::String(FORMAT_VERSION.to_string()));
        if let Some(root) = self.tree.effective_root_id() {
            manifest.insert(
                "root".to_string(),
                Value::String(self.board_paths[root].clone()),
            );
        }
        manifest.insert("paths".to_string(), Value::Object(paths));

        let mut entries = vec![ArchiveEntry::new(
            MANIFEST_ENTRY,
            to_json_bytes(&Value::Object(manifest))?,
        )];
        for (path, board) in boards {
            entries.push(ArchiveEntry::new(path, to_json_bytes(&board)?));
        }
        for (path, data) in files {
            entries.push(ArchiveEntry::new(path, data));
        }
        write_entries(&entries)
    }

    fn board(&self, page: &Page, files: &mut BTreeMap<String, Vec<u8>>) -> Result<Value> {
        let mut media = BoardMedia::default();
        let mut buttons = Vec::with_capacity(page.buttons.len());
        for button in &page.buttons {
            buttons.push(self.button(button, &mut media, files)?);
        }

        let mut board = Map::new();
        board.insert("format".to_string(), Value::String(FORMAT_VERSION.to_string()));
        board.insert("id".to_string(), Value::String(page.id.clone()));
        board.insert("name".to_string(), Value::String(page.name.clone()));
        if let Some(locale) = &self.tree.metadata.language {
            board.insert("locale".to_string(), Value::String(locale.clone()));
        }
        if self.tree.effective_root_id() == Some(page.id.as_str()) {
            if let Some(description) = &self.tree.metadata.description {
                board.insert(
                    "description_html".to_string(),
                    Value::String(description.clone()),
                );
            }
        }
        board.insert("grid".to_string(), self.grid(page));
        board.insert("buttons".to_string(), Value::Array(buttons));
        board.insert("images".to_string(), Value::Array(media.images));
        board.insert("sounds".to_string(), Value::Array(media.sounds));
        Ok(Value::Object(board))
    }

    fn button(
        &self,
        button: &Button,
        media: &mut BoardMedia,
        files: &mut BTreeMap<String, Vec<u8>>,
    ) -> Result<Value> {
        let mut object = Map::new();
        object.insert("id".to_string(), Value::String(button.id.clone()));
        object.insert("label".to_string(), Value::String(button.label.clone()));
        if button.message != button.label {
            object.insert(
                "vocalization".to_string(),
                Value::String(button.message.clone()),
            );
        }
        if let Some(style) = &button.style {
            if let Some(color) = style.background_color {
                object.insert("background_color".to_string(), Value::String(color.to_css()));
            }
            if let Some(color) = style.border_color {
                object.insert("border_color".to_string(), Value::String(color.to_css()));
            }
        }

        if let Some(target) = button.navigation_target() {
            let mut action = SemanticAction::navigate_to(target);
            if let Some(path) = self.package.then(|| self.board_paths.get(target)).flatten() {
                action = action.with_parameter(PARAM_PATH, path.as_str());
            }
            if let Value::Object(vendor) = denormalize(&action, Platform::Obf) {
                object.extend(vendor);
            }
        } else if let Some(action) = button
            .semantic_action
            .as_ref()
            .filter(|action| action.intent != ActionIntent::Speak)
        {
            if let Value::Object(vendor) = denormalize(action, Platform::Obf) {
                object.extend(vendor);
            }
        }

        if let Some(token) = button.image.as_deref().and_then(EntryToken::parse) {
            if let Some(data) = self.resources.fetch(&token)? {
                let id = self.attach(&data, "image", &mut media.images, &mut media.seen, files);
                object.insert("image_id".to_string(), Value::String(id));
            }
        }
        if let Some(audio) = button.audio.as_ref().filter(|audio| !audio.data.is_empty()) {
            let id = self.attach(&audio.data, "sound", &mut media.sounds, &mut media.seen, files);
            object.insert("sound_id".to_string(), Value::String(id));
        }
        Ok(Value::Object(object))
    }

    /// Registers media on the board and returns its id. Identical bytes share
    /// one id and, in a package, one file.
    fn attach(
        &self,
        data: &[u8],
        kind: &str,
        list: &mut Vec<Value>,
        seen: &mut HashSet<String>,
        files: &mut BTreeMap<String, Vec<u8>>,
    ) -> String {
        let digest = sha1_hex(data);
        let id = format!("{kind}_{}", &digest[..12]);
        if !seen.insert(id.clone()) {
            return id;
        }
        let content_type = media_type(data);
        let mut item = Map::new();
        item.insert("id".to_string(), Value::String(id.clone()));
        item.insert("content_type".to_string(), Value::String(content_type.to_string()));
        if self.package {
            let path = format!("{kind}s/{digest}.{}", extension_for(content_type));
            files.entry(path.clone()).or_insert_with(|| data.to_vec());
            item.insert("path".to_string(), Value::String(path));
        } else {
            item.insert(
                "data".to_string(),
                Value::String(DataUriResolver::encode(content_type, data)),
            );
        }
        list.push(Value::Object(item));
        id
    }

    /// Grid with an `order` matrix. Positioned buttons keep their cell; the
    /// rest fill free cells in reading order, growing the grid if needed.
    fn grid(&self, page: &Page) -> Value {
        let layout = page.grid.unwrap_or_else(|| {
            if page.buttons.len() as u32 <= self.default_grid.rows * self.default_grid.columns {
                self.default_grid
            } else {
                GridLayout::fitting(page.buttons.len())
            }
        });
        let columns = layout.columns.max(1) as usize;
        let mut rows = layout.rows.max(1) as usize;
        let mut cells: Vec<Option<&str>> = vec![None; rows * columns];

        let mut pending = Vec::new();
        for button in &page.buttons {
            match button.position {
                Some((x, y))
                    if (x as usize) < columns
                        && (y as usize) < rows
                        && cells[y as usize * columns + x as usize].is_none() =>
                {
                    cells[y as usize * columns + x as usize] = Some(button.id.as_str());
                }
                _ => pending.push(button.id.as_str()),
            }
        }
        let mut next = 0;
        for id in pending {
            while next < cells.len() && cells[next].is_some() {
                next += 1;
            }
            if next == cells.len() {
                rows += 1;
                cells.resize(rows * columns, None);
            }
            cells[next] = Some(id);
        }

        let order: Vec<Value> = cells
            .chunks(columns)
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|cell| cell.map_or(Value::Null, |id| Value::String(id.to_string())))
                        .collect(),
                )
            })
            .collect();

        let mut grid = Map::new();
        grid.insert("rows".to_string(), Value::from(rows as u64));
        grid.insert("columns".to_string(), Value::from(columns as u64));
        grid.insert("order".to_string(), Value::Array(order));
        Value::Object(grid)
    }
}

/// Rewrites the translatable values of one board. Unknown fields are kept.
fn translate_board(board: &mut Value, translations: &TranslationMap) -> usize {
    let mut updated = 0;
    let mut apply = |value: Option<&mut Value>| {
        if let Some(Value::String(text)) = value {
            if translations.apply(text) {
                updated += 1;
            }
        }
    };

    apply(board.get_mut("name"));
    apply(board.get_mut("description_html"));
    if let Some(buttons) = board.get_mut("buttons").and_then(Value::as_array_mut) {
        for button in buttons {
            apply(button.get_mut("label"));
            apply(button.get_mut("vocalization"));
        }
    }
    if let (Some(lang), Some(object)) = (translations.target_lang(), board.as_object_mut()) {
        object.insert("locale".to_string(), Value::String(lang.to_string()));
    }
    updated
}
