//! Grid 3 gridsets: a zip archive holding one `Grids/<name>/grid.xml` per
//! page, settings, named styles and a file map.
//!
//! Text processing rewrites XML text nodes in place. Entries other than grids
//! and settings are copied byte for byte.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::aac::processors::action::{
    ActionIntent, PARAM_TEXT, Platform, SemanticAction, denormalize, normalize,
};
use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::io::archive::{ArchiveEntry, find_entry, read_entries, write_entries};
use crate::aac::processors::io::xml::{
    XmlOut, child, child_text, children, decode_utf8, descend, parse_document, text_of,
};
use crate::aac::processors::io::{BoardFormat, BoardProcessor, Source, write_output};
use crate::aac::processors::model::{Button, ButtonType, GridLayout, Page, PageId, Tree};
use crate::aac::processors::resource::{
    ArchiveResolver, ChainResolver, EntryToken, NoResources, ResourceResolver,
    SymbolLibraryResolver, allowed_entries,
};
use crate::aac::processors::style::{Color, Style};
use crate::aac::processors::text::label_from_identifier;
use crate::aac::processors::translate::TranslationMap;

const FORMAT: &str = "gridset";
const SETTINGS_ENTRY: &str = "Settings0/settings.xml";
const STYLES_ENTRY: &str = "Settings0/Styles/style.xml";
const FILE_MAP_ENTRY: &str = "FileMap.xml";
const WORD_ID_MARKER: &str = "_word_";
const JUMP_TO: &str = "Jump.To";
const GRID_PARAM: &str = "grid";

/// Reads and writes Grid 3 `.gridset` archives.
#[derive(Debug, Clone, Default)]
pub struct GridsetProcessor {
    settings: Settings,
}

impl GridsetProcessor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn load_entries(&self, entries: &[ArchiveEntry]) -> Result<Tree> {
        let mut tree = Tree::new();
        let entry_names: HashSet<String> = entries
            .iter()
            .map(|entry| entry.name.to_ascii_lowercase())
            .collect();

        if let Some(styles) = find_entry(entries, STYLES_ENTRY) {
            tree.styles.named = parse_named_styles(&styles.data)?;
        }

        for entry in entries {
            let Some(folder) = grid_folder(&entry.name) else {
                continue;
            };
            let page = parse_grid(folder, &entry.data, &entry_names)?;
            debug!(page = %page.id, buttons = page.buttons.len(), "loaded grid");
            tree.add_page(page)?;
        }

        if let Some(settings) = find_entry(entries, SETTINGS_ENTRY) {
            let text = decode_utf8(FORMAT, &settings.data)?;
            let doc = parse_document(FORMAT, text)?;
            let root = doc.root_element();
            tree.root_id = child_text(root, "StartGrid");
            tree.metadata.description = child_text(root, "Description");
            tree.metadata.language = child_text(root, "Language");
        }

        Ok(tree)
    }

    fn build_archive(&self, tree: &Tree, resources: &dyn ResourceResolver) -> Result<Vec<u8>> {
        let folders = folder_names(tree);

        let mut media = BTreeMap::new();
        for token in allowed_entries(tree) {
            if let Some(data) = resources.fetch(&token)? {
                media.insert(token, data);
            }
        }

        let mut grids = Vec::new();
        for page in tree.pages() {
            let folder = &folders[&page.id];
            let (xml, images) = write_grid(page, folder, &folders, &media)?;
            grids.push(ArchiveEntry::new(format!("Grids/{folder}/grid.xml"), xml));
            grids.extend(images);
        }

        let mut entries = vec![
            ArchiveEntry::new(FILE_MAP_ENTRY, write_file_map(&folders)?),
            ArchiveEntry::new(SETTINGS_ENTRY, self.write_settings(tree, &folders)?),
        ];
        let styles = tree.styles.clone().with_category_defaults();
        entries.push(ArchiveEntry::new(
            STYLES_ENTRY,
            write_named_styles(&styles.named)?,
        ));
        entries.extend(grids);

        write_entries(&entries)
    }

    fn write_settings(&self, tree: &Tree, folders: &BTreeMap<PageId, String>) -> Result<Vec<u8>> {
        let mut out = XmlOut::new()?;
        out.start("GridSetSettings", &[])?;
        if let Some(root) = tree.effective_root_id() {
            let start = folders.get(root).map_or(root, String::as_str);
            out.text_element("StartGrid", start)?;
        }
        if let Some(description) = tree.metadata.description.as_deref() {
            out.text_element("Description", description)?;
        }
        let language = tree
            .metadata
            .language
            .as_deref()
            .or(self.settings.default_language.as_deref());
        if let Some(language) = language {
            out.text_element("Language", &grid3_language_code(language))?;
        }
        out.end("GridSetSettings")?;
        Ok(out.finish())
    }

    fn open_archive(&self, source: Source<'_>) -> Result<Vec<ArchiveEntry>> {
        let bytes = source.read()?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        read_entries(FORMAT, &bytes)
    }
}

impl BoardProcessor for GridsetProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn extensions(&self) -> &'static [&'static str] {
        BoardFormat::Gridset.extensions()
    }

    fn load_into_tree(&self, source: Source<'_>) -> Result<Tree> {
        let entries = self.open_archive(source)?;
        self.load_entries(&entries)
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn save_with_resources(
        &self,
        tree: &Tree,
        resources: &dyn ResourceResolver,
        destination: &Path,
    ) -> Result<()> {
        let bytes = self.build_archive(tree, resources)?;
        write_output(destination, &bytes)?;
        info!(pages = tree.len(), bytes = bytes.len(), "wrote gridset");
        Ok(())
    }

    fn extract_texts(&self, source: Source<'_>) -> Result<Vec<String>> {
        let entries = self.open_archive(source)?;
        let mut texts = Vec::new();
        let mut collect = |_: TextSlot, text: &str| {
            texts.push(text.trim().to_string());
            None
        };

        if let Some(settings) = find_entry(&entries, SETTINGS_ENTRY) {
            rewrite_text_nodes(&settings.data, None, &mut collect)?;
        }
        for entry in entries.iter().filter(|entry| grid_folder(&entry.name).is_some()) {
            rewrite_text_nodes(&entry.data, None, &mut collect)?;
        }
        Ok(texts)
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn process_texts(
        &self,
        source: Source<'_>,
        translations: &TranslationMap,
        destination: &Path,
    ) -> Result<Vec<u8>> {
        let entries = self.open_archive(source)?;
        let language = translations.target_lang().map(grid3_language_code);
        let mut translate = |_: TextSlot, text: &str| translations.lookup(text);

        let mut rewritten = Vec::with_capacity(entries.len());
        for entry in entries {
            let data = if grid_folder(&entry.name).is_some() {
                rewrite_text_nodes(&entry.data, None, &mut translate)?
            } else if entry.name.eq_ignore_ascii_case(SETTINGS_ENTRY) {
                rewrite_text_nodes(&entry.data, language.as_deref(), &mut translate)?
            } else {
                entry.data
            };
            rewritten.push(ArchiveEntry::new(entry.name, data));
        }

        let bytes = write_entries(&rewritten)?;
        write_output(destination, &bytes)?;
        info!(rules = translations.len(), entries = rewritten.len(), "translated gridset");
        Ok(bytes)
    }

    fn open_resources(&self, source: Source<'_>) -> Result<Box<dyn ResourceResolver>> {
        let bytes = source.read()?;
        if bytes.is_empty() {
            return Ok(Box::new(NoResources));
        }
        Ok(Box::new(ChainResolver::new(vec![
            Box::new(ArchiveResolver::new(bytes.into_owned())?),
            Box::new(SymbolLibraryResolver::new(&self.settings.symbol_libraries)),
        ])))
    }
}

/// Maps a language tag to the code Grid 3 expects. Right-to-left languages
/// without their own voice fall back to Arabic.
pub fn grid3_language_code(lang: &str) -> String {
    const RTL_FALLBACK: &[&str] = &["fa", "ur", "yi", "dv", "ha", "ps"];
    if RTL_FALLBACK.contains(&lang) {
        return "ar-SA".to_string();
    }
    let mapped = match lang {
        "af" => "af-ZA",
        "ar" => "ar-SA",
        "eu" => "eu-ES",
        "ca" => "ca-ES",
        "hr" => "hr-HR",
        "cs" => "cs-CZ",
        "da" => "da-DK",
        "nl" => "nl-NL",
        "en" => "en-GB",
        "fo" => "fo-FO",
        "fi" => "fi-FI",
        "fr" => "fr-FR",
        "de" => "de-DE",
        "el" => "el-GR",
        "he" => "he-IL",
        "it" => "it-IT",
        "nb" | "no" => "nb-NO",
        "pl" => "pl-PL",
        "pt" => "pt-PT",
        "ru" => "ru-RU",
        "sk" => "sk-SK",
        "sl" => "sl-SI",
        "es" => "es-ES",
        "sv" => "sv-SE",
        "uk" => "uk-UA",
        "cy" => "cy-GB",
        "zh" => "zh-CN",
        "ja" => "ja-JP",
        "ko" => "ko-KR",
        other => other,
    };
    mapped.to_string()
}

/// Folder name of a `Grids/<folder>/grid.xml` entry.
fn grid_folder(entry: &str) -> Option<&str> {
    let mut parts = entry.split('/');
    let (Some(grids), Some(folder), Some(file), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    (grids.eq_ignore_ascii_case("grids") && file.eq_ignore_ascii_case("grid.xml") && !folder.is_empty())
        .then_some(folder)
}

fn parse_grid(folder: &str, data: &[u8], entry_names: &HashSet<String>) -> Result<Page> {
    let text = decode_utf8(FORMAT, data)?;
    let doc = parse_document(FORMAT, text)?;
    let root = doc.root_element();

    let name = root
        .attribute("Name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| label_from_identifier(folder));
    let mut page = Page::new(folder, name);

    let rows = root.descendants().filter(|n| n.has_tag_name("RowDefinition")).count() as u32;
    let columns = root
        .descendants()
        .filter(|n| n.has_tag_name("ColumnDefinition"))
        .count() as u32;
    if rows > 0 || columns > 0 {
        page.grid = Some(GridLayout::new(rows.max(1), columns.max(1)));
    }
    if let Some(background) = child_text(root, "BackgroundColour").and_then(|c| Color::parse(&c)) {
        page.style = Some(Style::from_background(background));
    }

    if let Some(cells) = child(root, "Cells") {
        for cell in children(cells, "Cell") {
            if let Some(button) = parse_cell(folder, cell, entry_names) {
                page.buttons.push(button);
            }
        }
    }

    if let Some(items) = descend(root, "WordList/Items") {
        for (index, item) in children(items, "WordListItem").enumerate() {
            if let Some(word) = child_text(item, "Text") {
                page.buttons
                    .push(Button::speak(format!("{folder}{WORD_ID_MARKER}{index}"), word));
            }
        }
    }

    Ok(page)
}

fn parse_cell(
    folder: &str,
    cell: roxmltree::Node<'_, '_>,
    entry_names: &HashSet<String>,
) -> Option<Button> {
    let x = cell.attribute("X").and_then(|v| v.parse().ok()).unwrap_or(0);
    let y = cell.attribute("Y").and_then(|v| v.parse().ok()).unwrap_or(0);
    let content = child(cell, "Content")?;

    let caption = descend(content, "CaptionAndImage/Caption").and_then(text_of);
    let image = descend(content, "CaptionAndImage/Image").and_then(text_of);
    let commands: Vec<(String, Map<String, Value>)> = child(content, "Commands")
        .map(|commands| children(commands, "Command").map(parse_command).collect())
        .unwrap_or_default();
    if caption.is_none() && image.is_none() && commands.is_empty() {
        return None;
    }

    let mut button = Button::speak(format!("{folder}_button_{x}_{y}"), caption.unwrap_or_default());
    button.position = Some((x, y));

    let chosen = commands
        .iter()
        .find(|(id, _)| id == JUMP_TO)
        .or_else(|| commands.first());
    if let Some((id, parameters)) = chosen {
        let vendor = serde_json::json!({ "ID": id, "Parameters": parameters });
        let action = normalize(&vendor, Platform::Grid3);
        button.button_type = ButtonType::for_intent(action.intent);
        button.target_page_id = action.target().map(str::to_string);
        button.action = Some(id.clone());
        button.semantic_action = Some(action);
    }
    if let Some(text) = commands
        .iter()
        .find_map(|(_, parameters)| parameters.get(PARAM_TEXT).and_then(Value::as_str))
    {
        button.message = text.to_string();
    }

    button.style = child(content, "Style")
        .map(parse_style)
        .filter(|style| !style.is_empty());
    button.image = image.map(|image| {
        let entry = format!("Grids/{folder}/{image}");
        if entry_names.contains(&entry.to_ascii_lowercase()) {
            entry
        } else {
            image
        }
    });

    Some(button)
}

fn parse_command(command: roxmltree::Node<'_, '_>) -> (String, Map<String, Value>) {
    let id = command.attribute("ID").unwrap_or_default().to_string();
    let mut parameters = Map::new();
    for parameter in children(command, "Parameter") {
        if let Some(key) = parameter.attribute("Key") {
            let value = if key == PARAM_TEXT {
                joined_runs(parameter)
            } else {
                text_of(parameter)
            };
            let value = value.unwrap_or_default();
            parameters.insert(key.to_string(), Value::String(value));
        }
    }
    (id, parameters)
}

/// Text runs under `node`, each trimmed, joined with single spaces. Runs that
/// hold only whitespace are separators and are dropped.
fn joined_runs(node: roxmltree::Node<'_, '_>) -> Option<String> {
    let parts: Vec<&str> = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn parse_style(node: roxmltree::Node<'_, '_>) -> Style {
    let color = |name: &str| child_text(node, name).and_then(|raw| Color::parse(&raw));
    Style {
        based_on: child_text(node, "BasedOnStyle"),
        background_color: color("BackColour"),
        font_color: color("FontColour"),
        border_color: color("BorderColour"),
        font_family: child_text(node, "FontName"),
        font_size: child_text(node, "FontSize").and_then(|size| size.parse().ok()),
        ..Style::default()
    }
}

fn parse_named_styles(data: &[u8]) -> Result<BTreeMap<String, Style>> {
    let text = decode_utf8(FORMAT, data)?;
    let doc = parse_document(FORMAT, text)?;
    Ok(doc
        .descendants()
        .filter(|node| node.has_tag_name("Style"))
        .filter_map(|node| Some((node.attribute("Key")?.to_string(), parse_style(node))))
        .collect())
}

/// Folder for every page, derived from its id and unique ignoring case.
fn folder_names(tree: &Tree) -> BTreeMap<PageId, String> {
    let mut taken = HashSet::new();
    let mut folders = BTreeMap::new();
    for id in tree.page_ids() {
        let base = sanitize_folder(id);
        let mut folder = base.clone();
        let mut suffix = 2;
        while !taken.insert(folder.to_lowercase()) {
            folder = format!("{base} ({suffix})");
            suffix += 1;
        }
        folders.insert(id.clone(), folder);
    }
    folders
}

fn sanitize_folder(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').replace("..", "_");
    if cleaned.is_empty() {
        "Page".to_string()
    } else {
        cleaned
    }
}

type Command = (String, Vec<(String, String)>);

/// Commands written for a button. Navigation always targets the remapped
/// folder; an unknown target is written as-is.
fn commands_for(button: &Button, folders: &BTreeMap<PageId, String>) -> Vec<Command> {
    if let Some(target) = button.navigation_target() {
        let folder = folders.get(target).map_or(target, String::as_str);
        return vec![(
            JUMP_TO.to_string(),
            vec![(GRID_PARAM.to_string(), folder.to_string())],
        )];
    }

    let intent = button.semantic_action.as_ref().map(|action| action.intent);
    match (&button.semantic_action, intent) {
        (
            Some(action),
            Some(
                ActionIntent::GoBack
                | ActionIntent::GoHome
                | ActionIntent::Clear
                | ActionIntent::DeleteWord
                | ActionIntent::DeleteCharacter
                | ActionIntent::PlayAudio
                | ActionIntent::Custom,
            ),
        ) => vendor_command(action).into_iter().collect(),
        _ if !button.message.is_empty() && button.message != button.label => {
            let id = match intent {
                Some(ActionIntent::Speak | ActionIntent::SpeakCustom) => "Action.Speak",
                _ => "Action.InsertText",
            };
            vec![(
                id.to_string(),
                vec![(PARAM_TEXT.to_string(), button.message.clone())],
            )]
        }
        _ => Vec::new(),
    }
}

fn vendor_command(action: &SemanticAction) -> Option<Command> {
    let value = denormalize(action, Platform::Grid3);
    let id = value.get("ID")?.as_str()?.to_string();
    let parameters = value
        .get("Parameters")
        .and_then(Value::as_object)
        .map(|params| {
            params
                .iter()
                .map(|(key, value)| {
                    let text = value
                        .as_str()
                        .map_or_else(|| value.to_string(), str::to_string);
                    (key.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default();
    Some((id, parameters))
}

/// Assigns a cell to every non-word-list button. Explicit positions win;
/// the rest fill free cells in reading order.
fn layout(page: &Page) -> (GridLayout, Vec<(&Button, (u32, u32))>) {
    let cells: Vec<&Button> = page
        .buttons
        .iter()
        .filter(|button| !button.id.contains(WORD_ID_MARKER))
        .collect();
    let mut grid = page.grid.unwrap_or_else(|| GridLayout::fitting(cells.len()));

    let mut used: HashSet<(u32, u32)> = cells.iter().filter_map(|b| b.position).collect();
    let mut next = 0u32;
    let mut placed = Vec::with_capacity(cells.len());
    for button in cells {
        let position = match button.position {
            Some(position) => position,
            None => loop {
                let candidate = (next % grid.columns, next / grid.columns);
                next += 1;
                if used.insert(candidate) {
                    break candidate;
                }
            },
        };
        grid.columns = grid.columns.max(position.0 + 1);
        grid.rows = grid.rows.max(position.1 + 1);
        placed.push((button, position));
    }
    (grid, placed)
}

fn write_grid(
    page: &Page,
    folder: &str,
    folders: &BTreeMap<PageId, String>,
    media: &BTreeMap<EntryToken, Vec<u8>>,
) -> Result<(Vec<u8>, Vec<ArchiveEntry>)> {
    let guid = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("gridset:{folder}").as_bytes()).to_string();
    let (grid, cells) = layout(page);
    let mut images = Vec::new();

    let mut out = XmlOut::new()?;
    out.start("Grid", &[("Name", page.name.as_str()), ("GridGuid", guid.as_str())])?;
    if let Some(background) = page.style.as_ref().and_then(|style| style.background_color) {
        out.text_element("BackgroundColour", &background.to_hex())?;
    }

    out.start("ColumnDefinitions", &[])?;
    for _ in 0..grid.columns {
        out.empty("ColumnDefinition", &[])?;
    }
    out.end("ColumnDefinitions")?;
    out.start("RowDefinitions", &[])?;
    for _ in 0..grid.rows {
        out.empty("RowDefinition", &[])?;
    }
    out.end("RowDefinitions")?;

    out.start("Cells", &[])?;
    for (button, (x, y)) in cells {
        let (x_attr, y_attr) = (x.to_string(), y.to_string());
        out.start("Cell", &[("X", x_attr.as_str()), ("Y", y_attr.as_str())])?;
        out.start("Content", &[])?;

        let commands = commands_for(button, folders);
        if !commands.is_empty() {
            out.start("Commands", &[])?;
            for (id, parameters) in &commands {
                out.start("Command", &[("ID", id.as_str())])?;
                for (key, value) in parameters {
                    out.start("Parameter", &[("Key", key.as_str())])?;
                    if key == PARAM_TEXT {
                        write_rich_text(&mut out, value)?;
                    } else {
                        out.text(value)?;
                    }
                    out.end("Parameter")?;
                }
                out.end("Command")?;
            }
            out.end("Commands")?;
        }

        out.start("CaptionAndImage", &[])?;
        out.text_element("Caption", &button.label)?;
        if let Some(image) = image_reference(button, folder, (x, y), media, &mut images) {
            out.text_element("Image", &image)?;
        }
        out.end("CaptionAndImage")?;

        if let Some(style) = button.style.as_ref().filter(|style| !style.is_empty()) {
            write_style(&mut out, "Style", None, style)?;
        }

        out.end("Content")?;
        out.end("Cell")?;
    }
    out.end("Cells")?;

    let words: Vec<&Button> = page
        .buttons
        .iter()
        .filter(|button| button.id.contains(WORD_ID_MARKER))
        .collect();
    if !words.is_empty() {
        out.start("WordList", &[])?;
        out.start("Items", &[])?;
        for word in words {
            out.start("WordListItem", &[])?;
            out.start("Text", &[])?;
            out.start("s", &[])?;
            out.text_element("r", &word.label)?;
            out.end("s")?;
            out.end("Text")?;
            out.end("WordListItem")?;
        }
        out.end("Items")?;
        out.end("WordList")?;
    }

    out.end("Grid")?;
    Ok((out.finish(), images))
}

fn write_rich_text(out: &mut XmlOut, text: &str) -> Result<()> {
    out.start("p", &[])?;
    out.start("s", &[])?;
    out.text_element("r", text)?;
    out.end("s")?;
    out.end("p")
}

/// Value for the cell's `Image` element. Resolved media is copied next to the
/// grid; symbol references are kept as tokens.
fn image_reference(
    button: &Button,
    folder: &str,
    (x, y): (u32, u32),
    media: &BTreeMap<EntryToken, Vec<u8>>,
    images: &mut Vec<ArchiveEntry>,
) -> Option<String> {
    let token = button.image.as_deref().and_then(EntryToken::parse)?;
    if let Some(data) = media.get(&token) {
        let extension = match &token {
            EntryToken::ArchiveEntry(path) | EntryToken::Symbol { path, .. } => Path::new(path)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("png")
                .to_string(),
            _ => "png".to_string(),
        };
        let file = format!("{x}-{y}-0-text-0.{extension}");
        images.push(ArchiveEntry::new(format!("Grids/{folder}/{file}"), data.clone()));
        return Some(file);
    }
    match token {
        EntryToken::Symbol { .. } => Some(token.to_string()),
        _ => None,
    }
}

fn write_style(out: &mut XmlOut, element: &str, key: Option<&str>, style: &Style) -> Result<()> {
    match key {
        Some(key) => out.start(element, &[("Key", key)])?,
        None => out.start(element, &[])?,
    }
    if let Some(based_on) = style.based_on.as_deref() {
        out.text_element("BasedOnStyle", based_on)?;
    }
    let colors = [
        ("BackColour", style.background_color),
        ("BorderColour", style.border_color),
        ("FontColour", style.font_color),
    ];
    for (name, color) in colors {
        if let Some(color) = color {
            out.text_element(name, &color.to_hex())?;
        }
    }
    if let Some(font) = style.font_family.as_deref() {
        out.text_element("FontName", font)?;
    }
    if let Some(size) = style.font_size {
        out.text_element("FontSize", &size.to_string())?;
    }
    out.end(element)
}

fn write_named_styles(styles: &BTreeMap<String, Style>) -> Result<Vec<u8>> {
    let mut out = XmlOut::new()?;
    out.start("StyleData", &[])?;
    out.start("Styles", &[])?;
    for (key, style) in styles {
        write_style(&mut out, "Style", Some(key), style)?;
    }
    out.end("Styles")?;
    out.end("StyleData")?;
    Ok(out.finish())
}

fn write_file_map(folders: &BTreeMap<PageId, String>) -> Result<Vec<u8>> {
    let mut out = XmlOut::new()?;
    out.start("FileMap", &[])?;
    out.start("Entries", &[])?;
    for folder in folders.values() {
        let path = format!("Grids\\{folder}\\grid.xml");
        out.empty("Entry", &[("StaticFile", path.as_str())])?;
    }
    out.end("Entries")?;
    out.end("FileMap")?;
    Ok(out.finish())
}

/// Translatable positions inside grid and settings XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextSlot {
    GridName,
    Caption,
    WordListItem,
    TextParameter,
    Description,
}

fn slot_for(stack: &[String]) -> Option<TextSlot> {
    let depth = stack.len();
    let top = stack.last()?;
    if top == "Caption" && depth >= 2 && stack[depth - 2] == "CaptionAndImage" {
        return Some(TextSlot::Caption);
    }
    if let Some(item) = stack.iter().position(|name| name == "WordListItem") {
        if stack[item + 1..].iter().any(|name| name == "Text") {
            return Some(TextSlot::WordListItem);
        }
    }
    if depth == 2 && stack[0] == "GridSetSettings" && top == "Description" {
        return Some(TextSlot::Description);
    }
    None
}

fn is_settings_language(stack: &[String]) -> bool {
    stack.len() == 2 && stack[0] == "GridSetSettings" && stack[1] == "Language"
}

fn attribute_value(start: &BytesStart<'_>, key: &str) -> Option<String> {
    start
        .try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Body of a `Parameter Key="text"` element, held back until the parameter
/// closes so its runs can be offered as one phrase.
struct TextParameter<'a> {
    depth: usize,
    events: Vec<Event<'a>>,
    parts: Vec<String>,
    first_span: Option<BytesStart<'a>>,
    rich: bool,
}

impl<'a> TextParameter<'a> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            events: Vec::new(),
            parts: Vec::new(),
            first_span: None,
            rich: false,
        }
    }

    fn phrase(&self) -> String {
        self.parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Writes the body back, either untouched or as a single run holding the
    /// replacement. The first span's attributes are kept.
    fn finish<F>(self, writer: &mut Writer<Vec<u8>>, visit: &mut F) -> Result<()>
    where
        F: FnMut(TextSlot, &str) -> Option<String>,
    {
        let phrase = self.phrase();
        let replacement = if phrase.is_empty() {
            None
        } else {
            visit(TextSlot::TextParameter, &phrase)
        };
        let Some(replacement) = replacement else {
            for event in self.events {
                writer.write_event(event).map_err(ProcessorError::xml)?;
            }
            return Ok(());
        };

        if !self.rich {
            return writer
                .write_event(Event::Text(BytesText::new(&replacement)))
                .map_err(ProcessorError::xml);
        }
        let span = self.first_span.unwrap_or_else(|| BytesStart::new("s"));
        let span_end = span.to_end().into_owned();
        let events = [
            Event::Start(BytesStart::new("p")),
            Event::Start(span),
            Event::Start(BytesStart::new("r")),
            Event::Text(BytesText::new(&replacement)),
            Event::End(BytesEnd::new("r")),
            Event::End(span_end),
            Event::End(BytesEnd::new("p")),
        ];
        for event in events {
            writer.write_event(event).map_err(ProcessorError::xml)?;
        }
        Ok(())
    }
}

/// Copies `xml` event by event, offering every translatable text node (and
/// the grid's `Name` attribute) to `visit`. A returned string replaces the
/// node's text; everything else is written back unchanged. The runs of a
/// text parameter are offered together, joined by single spaces. With
/// `language` set, the settings `Language` element is set or inserted.
fn rewrite_text_nodes<F>(xml: &[u8], language: Option<&str>, visit: &mut F) -> Result<Vec<u8>>
where
    F: FnMut(TextSlot, &str) -> Option<String>,
{
    let text = decode_utf8(FORMAT, xml)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    let mut stack: Vec<String> = Vec::new();
    let mut parameter: Option<TextParameter<'_>> = None;
    let mut language_written = false;

    loop {
        let event = reader.read_event().map_err(ProcessorError::xml)?;

        if let Some(body) = parameter.as_mut() {
            if matches!(event, Event::End(_)) && stack.len() == body.depth + 1 {
                if let Some(body) = parameter.take() {
                    body.finish(&mut writer, visit)?;
                }
                stack.pop();
                writer.write_event(event).map_err(ProcessorError::xml)?;
                continue;
            }
            match &event {
                Event::Start(start) => {
                    let name = element_name(start);
                    if name == "s" && body.first_span.is_none() {
                        body.first_span = Some(start.clone());
                    }
                    body.rich |= name == "r";
                    stack.push(name);
                }
                Event::Empty(empty) => body.rich |= element_name(empty) == "r",
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(node) => {
                    body.parts
                        .push(node.unescape().map_err(ProcessorError::xml)?.into_owned());
                }
                Event::CData(data) => {
                    body.parts.push(String::from_utf8_lossy(data).into_owned());
                }
                Event::Eof => {
                    return Err(ProcessorError::load(FORMAT, "unterminated text parameter"));
                }
                _ => {}
            }
            body.events.push(event);
            continue;
        }

        match event {
            Event::Start(start) => {
                let name = element_name(&start);
                if name == "Parameter"
                    && attribute_value(&start, "Key").as_deref() == Some(PARAM_TEXT)
                {
                    parameter = Some(TextParameter::new(stack.len()));
                }
                let start = if stack.is_empty() && name == "Grid" {
                    rename_grid(start, visit)?
                } else {
                    start
                };
                stack.push(name);
                writer
                    .write_event(Event::Start(start))
                    .map_err(ProcessorError::xml)?;
            }
            Event::End(end) => {
                if let Some(language) = language {
                    if stack.len() == 1 && stack[0] == "GridSetSettings" && !language_written {
                        write_language(&mut writer, language)?;
                        language_written = true;
                    }
                    if is_settings_language(&stack) && !language_written {
                        writer
                            .write_event(Event::Text(BytesText::new(language)))
                            .map_err(ProcessorError::xml)?;
                        language_written = true;
                    }
                }
                stack.pop();
                writer
                    .write_event(Event::End(end))
                    .map_err(ProcessorError::xml)?;
            }
            Event::Empty(empty) => {
                let name = element_name(&empty);
                if let Some(language) = language {
                    if stack.len() == 1 && stack[0] == "GridSetSettings" && name == "Language" {
                        write_language(&mut writer, language)?;
                        language_written = true;
                        continue;
                    }
                }
                let empty = if stack.is_empty() && name == "Grid" {
                    rename_grid(empty, visit)?
                } else {
                    empty
                };
                writer
                    .write_event(Event::Empty(empty))
                    .map_err(ProcessorError::xml)?;
            }
            Event::Text(node) => {
                if let (Some(language), true) = (language, is_settings_language(&stack)) {
                    writer
                        .write_event(Event::Text(BytesText::new(language)))
                        .map_err(ProcessorError::xml)?;
                    language_written = true;
                    continue;
                }
                let replacement = {
                    let raw = node.unescape().map_err(ProcessorError::xml)?;
                    match slot_for(&stack) {
                        Some(slot) if !raw.trim().is_empty() => visit(slot, &raw),
                        _ => None,
                    }
                };
                let event = match replacement {
                    Some(replacement) => Event::Text(BytesText::new(&replacement).into_owned()),
                    None => Event::Text(node),
                };
                writer.write_event(event).map_err(ProcessorError::xml)?;
            }
            Event::Eof => break,
            other => writer.write_event(other).map_err(ProcessorError::xml)?,
        }
    }

    Ok(writer.into_inner())
}

fn write_language(writer: &mut Writer<Vec<u8>>, language: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("Language")))
        .map_err(ProcessorError::xml)?;
    writer
        .write_event(Event::Text(BytesText::new(language)))
        .map_err(ProcessorError::xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("Language")))
        .map_err(ProcessorError::xml)
}

/// Offers the grid's `Name` attribute to `visit`, rebuilding the start tag
/// only when it changes.
fn rename_grid<'a, F>(start: BytesStart<'a>, visit: &mut F) -> Result<BytesStart<'a>>
where
    F: FnMut(TextSlot, &str) -> Option<String>,
{
    let Some(name) = attribute_value(&start, "Name") else {
        return Ok(start);
    };
    if name.trim().is_empty() {
        return Ok(start);
    }
    let Some(replacement) = visit(TextSlot::GridName, &name) else {
        return Ok(start);
    };

    let mut renamed = BytesStart::new(element_name(&start));
    for attr in start.attributes() {
        let attr = attr.map_err(ProcessorError::xml)?;
        if attr.key.as_ref() == b"Name" {
            renamed.push_attribute(("Name", replacement.as_str()));
        } else {
            renamed.push_attribute(attr);
        }
    }
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_codes_follow_grid3_table() {
        assert_eq!(grid3_language_code("fr"), "fr-FR");
        assert_eq!(grid3_language_code("no"), "nb-NO");
        assert_eq!(grid3_language_code("ur"), "ar-SA");
        assert_eq!(grid3_language_code("he"), "he-IL");
        assert_eq!(grid3_language_code("pt-BR"), "pt-BR");
        assert_eq!(grid3_language_code("xx"), "xx");
    }

    #[test]
    fn folder_names_are_sanitised_and_unique() {
        let mut tree = Tree::new();
        for id in ["a/b", "A_B", ""] {
            tree.add_page(Page::new(id, id)).expect("page");
        }
        let folders = folder_names(&tree);
        assert_eq!(folders[""], "Page");
        assert_eq!(folders["A_B"], "A_B");
        assert_eq!(folders["a/b"], "a_b (2)");
    }

    #[test]
    fn grid_folder_matches_only_grid_entries() {
        assert_eq!(grid_folder("Grids/Home/grid.xml"), Some("Home"));
        assert_eq!(grid_folder("grids/Home/GRID.XML"), Some("Home"));
        assert_eq!(grid_folder("Grids/Home/image.png"), None);
        assert_eq!(grid_folder("Grids/a/b/grid.xml"), None);
    }

    #[test]
    fn settings_language_is_inserted_and_description_translated() {
        let xml = b"<GridSetSettings><StartGrid>Home</StartGrid><Description>Core words</Description></GridSetSettings>";
        let map = TranslationMap::from_pairs([(Some("Core words".into()), Some("Mots".into()))]);
        let mut translate = |_: TextSlot, text: &str| map.lookup(text);
        let out = rewrite_text_nodes(xml, Some("fr-FR"), &mut translate).expect("rewrite");
        let out = String::from_utf8(out).expect("utf8");
        assert_eq!(
            out,
            "<GridSetSettings><StartGrid>Home</StartGrid><Description>Mots</Description><Language>fr-FR</Language></GridSetSettings>"
        );
    }

    #[test]
    fn rich_text_runs_and_captions_are_rewritten() {
        let xml = br#"<Grid Name="Home"><Cells><Cell><Content><Commands><Command ID="Action.InsertText"><Parameter Key="text"><p><s><r>I want</r></s></p></Parameter></Command></Commands><CaptionAndImage><Caption>want</Caption></CaptionAndImage></Content></Cell></Cells></Grid>"#;
        let mut seen = Vec::new();
        let mut visit = |slot: TextSlot, text: &str| {
            seen.push((slot, text.to_string()));
            (slot == TextSlot::Caption).then(|| "veux".to_string())
        };
        let out = rewrite_text_nodes(xml, None, &mut visit).expect("rewrite");
        assert_eq!(
            seen,
            vec![
                (TextSlot::GridName, "Home".to_string()),
                (TextSlot::TextParameter, "I want".to_string()),
                (TextSlot::Caption, "want".to_string()),
            ]
        );
        assert!(String::from_utf8(out).expect("utf8").contains("<Caption>veux</Caption>"));
    }

    const SPLIT_RUNS: &[u8] = br#"<Grid Name="Home"><Cells><Cell><Content><Commands><Command ID="Action.InsertText"><Parameter Key="text"><p><s Image="x"><r>I</r></s><s><r><![CDATA[ ]]></r></s><s><r>want</r></s></p></Parameter></Command></Commands></Content></Cell></Cells></Grid>"#;

    #[test]
    fn split_runs_are_offered_as_one_phrase() {
        let map = TranslationMap::from_pairs([(Some("I want".into()), Some("Je veux".into()))]);
        let mut seen = Vec::new();
        let mut visit = |slot: TextSlot, text: &str| {
            seen.push((slot, text.to_string()));
            map.lookup(text)
        };
        let out = rewrite_text_nodes(SPLIT_RUNS, None, &mut visit).expect("rewrite");
        assert_eq!(
            seen,
            vec![
                (TextSlot::GridName, "Home".to_string()),
                (TextSlot::TextParameter, "I want".to_string()),
            ]
        );
        let out = String::from_utf8(out).expect("utf8");
        assert!(
            out.contains(r#"<Parameter Key="text"><p><s Image="x"><r>Je veux</r></s></p></Parameter>"#),
            "{out}"
        );
    }

    #[test]
    fn untranslated_split_runs_are_copied_verbatim() {
        let mut visit = |_: TextSlot, _: &str| None;
        let out = rewrite_text_nodes(SPLIT_RUNS, None, &mut visit).expect("rewrite");
        assert_eq!(out, SPLIT_RUNS);
    }

    #[test]
    fn loaded_message_joins_split_runs() {
        let page = parse_grid("Home", SPLIT_RUNS, &HashSet::new()).expect("grid");
        assert_eq!(page.buttons.len(), 1);
        assert_eq!(page.buttons[0].message, "I want");
    }
}
