use std::fs;

use aac_processors::config::Settings;
use aac_processors::io::archive::{ArchiveEntry, write_entries};
use aac_processors::io::{BoardFormat, BoardProcessor, Source};
use aac_processors::model::{AudioRecording, Button, ButtonType, GridLayout, Page, Tree};
use aac_processors::resource::{DataUriResolver, ResourceResolver, SymbolLibraryResolver};
use aac_processors::translate::TranslationMap;
use aac_processors::{ProcessorError, sync};
use proptest::prelude::*;
use tempfile::tempdir;

/// Formats that keep every page and its id across a save and reload.
const ID_PRESERVING: [(BoardFormat, &str); 5] = [
    (BoardFormat::Gridset, "board.gridset"),
    (BoardFormat::Snap, "board.sps"),
    (BoardFormat::TouchChat, "board.ce"),
    (BoardFormat::Obf, "board.obz"),
    (BoardFormat::Excel, "board.xlsx"),
];

fn processor(format: BoardFormat) -> Box<dyn BoardProcessor> {
    format.processor(&Settings::default())
}

fn scenario_tree() -> Tree {
    let mut tree = Tree::new();

    let mut home = Page::new("home", "Home")
        .with_button(Button::navigate("to-food", "Food", "food"))
        .with_button(Button::navigate("to-drinks", "Drinks", "drinks"))
        .with_button(Button::speak("hello", "Hello"));
    home.grid = Some(GridLayout::new(1, 3));
    tree.add_page(home).expect("home page");

    let food = Page::new("food", "Food")
        .with_button(Button::speak("apple", "Apple"))
        .with_button(Button::speak("bread", "Bread"));
    tree.add_page(food).expect("food page");

    let drinks = Page::new("drinks", "Drinks").with_button(Button::speak("water", "Water"));
    tree.add_page(drinks).expect("drinks page");

    tree.root_id = Some("home".into());
    tree.metadata.name = Some("Scenario".into());
    tree
}

fn sorted_labels(page: &Page) -> Vec<String> {
    let mut labels: Vec<String> = page.buttons.iter().map(|b| b.label.clone()).collect();
    labels.sort();
    labels
}

fn assert_home_links_food(tree: &Tree, context: &str) {
    let home = tree
        .pages()
        .find(|page| page.name.eq_ignore_ascii_case("home"))
        .unwrap_or_else(|| panic!("{context}: home page present"));
    let links = home
        .buttons
        .iter()
        .filter(|button| button.button_type == ButtonType::Navigate)
        .filter(|button| {
            button
                .navigation_target()
                .and_then(|target| tree.get_page(target))
                .is_some_and(|page| page.name.eq_ignore_ascii_case("food"))
        })
        .count();
    assert_eq!(links, 1, "{context}: exactly one link to Food");
}

#[test]
fn save_and_reload_keeps_pages_and_labels() {
    let tree = scenario_tree();
    let temp_dir = tempdir().expect("temporary directory");

    for (format, file) in ID_PRESERVING {
        let path = temp_dir.path().join(file);
        let processor = processor(format);
        processor.save_from_tree(&tree, &path).expect("saved");
        let restored = processor
            .load_into_tree(Source::Path(&path))
            .expect("reloaded");

        assert_eq!(restored.len(), tree.len(), "{file}: page count");
        for page in tree.pages() {
            let other = restored
                .get_page(&page.id)
                .unwrap_or_else(|| panic!("{file}: page {} kept", page.id));
            assert_eq!(sorted_labels(other), sorted_labels(page), "{file}: {}", page.id);
        }
    }
}

#[test]
fn navigation_to_food_survives_every_format() {
    let tree = scenario_tree();
    let temp_dir = tempdir().expect("temporary directory");

    let files = ID_PRESERVING
        .into_iter()
        .chain([(BoardFormat::Opml, "board.opml")]);
    for (format, file) in files {
        let path = temp_dir.path().join(file);
        let processor = processor(format);
        processor.save_from_tree(&tree, &path).expect("saved");
        let restored = processor
            .load_into_tree(Source::Path(&path))
            .expect("reloaded");
        assert_home_links_food(&restored, file);
    }
}

#[test]
fn empty_translation_map_is_a_no_op() {
    let tree = scenario_tree();
    let temp_dir = tempdir().expect("temporary directory");
    let empty = TranslationMap::new();

    let files = ID_PRESERVING
        .into_iter()
        .chain([(BoardFormat::Opml, "board.opml")]);
    for (format, file) in files {
        let source = temp_dir.path().join(file);
        let destination = temp_dir.path().join(format!("copy-{file}"));
        let processor = processor(format);
        processor.save_from_tree(&tree, &source).expect("saved");

        let written = processor
            .process_texts(Source::Path(&source), &empty, &destination)
            .expect("processed");
        assert_eq!(written, fs::read(&destination).expect("output read"), "{file}");

        let before = processor.extract_texts(Source::Path(&source)).expect("source texts");
        let after = processor
            .extract_texts(Source::Path(&destination))
            .expect("output texts");
        assert!(!before.is_empty(), "{file}: texts found");
        assert_eq!(after, before, "{file}");
    }
}

#[test]
fn translations_reach_every_format() {
    let tree = scenario_tree();
    let temp_dir = tempdir().expect("temporary directory");
    let translations = TranslationMap::from_pairs([
        (Some("Food".to_string()), Some("Comida".to_string())),
        (Some("Water".to_string()), Some("Agua".to_string())),
    ]);

    let files = ID_PRESERVING
        .into_iter()
        .chain([(BoardFormat::Opml, "board.opml")]);
    for (format, file) in files {
        let source = temp_dir.path().join(file);
        let destination = temp_dir.path().join(format!("es-{file}"));
        let processor = processor(format);
        processor.save_from_tree(&tree, &source).expect("saved");
        processor
            .process_texts(Source::Path(&source), &translations, &destination)
            .expect("translated");

        let texts = processor
            .extract_texts(Source::Path(&destination))
            .expect("translated texts");
        assert!(texts.iter().any(|text| text == "Comida"), "{file}: {texts:?}");
        assert!(texts.iter().any(|text| text == "Agua"), "{file}: {texts:?}");
        assert!(!texts.iter().any(|text| text == "Food"), "{file}: {texts:?}");
    }
}

#[test]
fn map_order_does_not_change_output() {
    let tree = scenario_tree();
    let temp_dir = tempdir().expect("temporary directory");
    let pairs = [
        ("Food", "Comida"),
        ("Drinks", "Bebidas"),
        ("Apple", "Manzana"),
        ("Hello", "Hola"),
    ];
    let forward = TranslationMap::from_pairs(
        pairs
            .iter()
            .map(|(from, to)| (Some(from.to_string()), Some(to.to_string()))),
    )
    .with_target_lang("es");
    let backward = TranslationMap::from_pairs(
        pairs
            .iter()
            .rev()
            .map(|(from, to)| (Some(from.to_string()), Some(to.to_string()))),
    )
    .with_target_lang("es");

    for (format, file) in [
        (BoardFormat::Gridset, "board.gridset"),
        (BoardFormat::Opml, "board.opml"),
        (BoardFormat::Obf, "board.obz"),
    ] {
        let source = temp_dir.path().join(file);
        let processor = processor(format);
        processor.save_from_tree(&tree, &source).expect("saved");

        let first = processor
            .process_texts(Source::Path(&source), &forward, &temp_dir.path().join("a"))
            .expect("forward");
        let second = processor
            .process_texts(Source::Path(&source), &backward, &temp_dir.path().join("b"))
            .expect("backward");
        assert_eq!(first, second, "{file}");
    }
}

/// Pages `p0..pN`. Each edge becomes a navigation button; a target past the
/// last page dangles, spelled as a bare number or as a missing name. Even
/// pages also get a speak button, so pages without edges on odd indexes are
/// empty.
fn generated_tree(pages: usize, edges: &[(usize, usize)]) -> Tree {
    let mut tree = Tree::new();
    for index in 0..pages {
        let mut page = Page::new(format!("p{index}"), format!("Page {index}"));
        if index % 2 == 0 {
            page.buttons
                .push(Button::speak(format!("s{index}"), format!("Word {index}")));
        }
        for (edge, (_, to)) in edges.iter().enumerate().filter(|(_, (from, _))| *from == index) {
            let target = if *to < pages {
                format!("p{to}")
            } else if to % 2 == 0 {
                to.to_string()
            } else {
                format!("gone-{to}")
            };
            page.buttons.push(Button::navigate(
                format!("e{edge}"),
                format!("Edge {edge}"),
                target,
            ));
        }
        tree.add_page(page).expect("unique page");
    }
    tree.root_id = Some("p0".into());
    tree
}

/// `(label, navigation target)` for every button, sorted.
fn links(page: &Page) -> Vec<(String, Option<String>)> {
    let mut links: Vec<_> = page
        .buttons
        .iter()
        .map(|button| {
            (
                button.label.clone(),
                button.navigation_target().map(str::to_string),
            )
        })
        .collect();
    links.sort();
    links
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn generated_trees_reload_with_links_intact(
        pages in 1usize..7,
        edges in prop::collection::vec((0usize..7, 0usize..10), 0..16),
    ) {
        let tree = generated_tree(pages, &edges);
        let temp_dir = tempdir().expect("temporary directory");

        for (format, file) in ID_PRESERVING {
            let path = temp_dir.path().join(file);
            let processor = processor(format);
            processor.save_from_tree(&tree, &path).expect("saved");
            let restored = processor
                .load_into_tree(Source::Path(&path))
                .expect("reloaded");

            prop_assert_eq!(restored.len(), tree.len(), "{}: page count", file);
            for page in tree.pages() {
                let other = restored.get_page(&page.id);
                prop_assert!(other.is_some(), "{}: page {} kept", file, page.id);
                if let Some(other) = other {
                    prop_assert_eq!(links(other), links(page), "{}: {}", file, page.id);
                }
            }
        }
    }
}

#[test]
fn gridset_phrase_split_across_runs_is_translated_whole() {
    let grid = br#"<Grid Name="Home"><Cells><Cell X="0" Y="0"><Content><Commands><Command ID="Action.InsertText"><Parameter Key="text"><p><s><r>I</r></s><s><r><![CDATA[ ]]></r></s><s><r>want</r></s></p></Parameter></Command></Commands><CaptionAndImage><Caption>I want</Caption></CaptionAndImage></Content></Cell></Cells></Grid>"#;
    let temp_dir = tempdir().expect("temporary directory");
    let source = temp_dir.path().join("phrase.gridset");
    let destination = temp_dir.path().join("phrase_fr.gridset");
    let entries = [ArchiveEntry::new("Grids/Home/grid.xml", grid.to_vec())];
    fs::write(&source, write_entries(&entries).expect("zip built")).expect("archive written");

    let gridset = processor(BoardFormat::Gridset);
    let texts = gridset.extract_texts(Source::Path(&source)).expect("texts");
    assert_eq!(texts, vec!["Home", "I want", "I want"]);

    let translations =
        TranslationMap::from_pairs([(Some("I want".to_string()), Some("Je veux".to_string()))]);
    gridset
        .process_texts(Source::Path(&source), &translations, &destination)
        .expect("translated");
    let texts = gridset
        .extract_texts(Source::Path(&destination))
        .expect("translated texts");
    assert_eq!(texts, vec!["Home", "Je veux", "Je veux"]);

    let tree = gridset
        .load_into_tree(Source::Path(&destination))
        .expect("reloaded");
    let button = &tree.get_page("Home").expect("home").buttons[0];
    assert_eq!(button.label, "Je veux");
    assert_eq!(button.message, "Je veux");
}

#[test]
fn foreign_database_inside_touchchat_archive_is_a_load_error() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("broken.ce");
    let entries = [ArchiveEntry::new("vocab.c4v", b"definitely not sqlite".to_vec())];
    fs::write(&path, write_entries(&entries).expect("zip built")).expect("archive written");

    let err = processor(BoardFormat::TouchChat)
        .load_into_tree(Source::Path(&path))
        .expect_err("bad header rejected");
    assert!(matches!(err, ProcessorError::Load { .. }), "{err}");
}

#[test]
fn snap_file_without_sqlite_header_is_a_load_error() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("broken.sps");
    fs::write(&path, b"PK\x03\x04 this is a zip, not a page set").expect("written");

    let err = processor(BoardFormat::Snap)
        .load_into_tree(Source::Path(&path))
        .expect_err("bad header rejected");
    assert!(matches!(err, ProcessorError::Load { .. }), "{err}");
}

#[test]
fn empty_sources_load_as_empty_trees() {
    for format in BoardFormat::ALL {
        let tree = processor(format)
            .load_into_tree(Source::Bytes(&[]))
            .expect("empty source");
        assert!(tree.is_empty(), "{format:?}");
    }
}

#[test]
fn identical_snap_audio_is_stored_once() {
    let clip = b"RIFF\x24\x00\x00\x00WAVEfmt fake clip".to_vec();
    let mut first = Button::speak("b1", "Yes");
    first.audio = Some(AudioRecording::new(clip.clone()));
    let mut second = Button::speak("b2", "Yes please");
    second.audio = Some(AudioRecording::new(clip.clone()));

    let mut tree = Tree::new();
    tree.add_page(Page::new("home", "Home").with_button(first).with_button(second))
        .expect("page");

    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("audio.sps");
    let processor = processor(BoardFormat::Snap);
    processor.save_from_tree(&tree, &path).expect("saved");

    let connection = rusqlite::Connection::open(&path).expect("database opened");
    let rows: Vec<(String, i64)> = connection
        .prepare("SELECT Identifier, RefCount FROM PageSetData WHERE Identifier LIKE 'SND:%'")
        .expect("query prepared")
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("query ran")
        .collect::<Result<_, _>>()
        .expect("rows read");
    assert_eq!(rows, vec![(AudioRecording::identifier_for(&clip), 2)]);
    drop(connection);

    let restored = processor
        .load_into_tree(Source::Path(&path))
        .expect("reloaded");
    let identifiers: Vec<_> = restored
        .get_page("home")
        .expect("home")
        .buttons
        .iter()
        .map(|button| button.audio.as_ref().map(|audio| audio.identifier.clone()))
        .collect();
    assert_eq!(identifiers[0], identifiers[1]);
    assert!(identifiers[0].is_some());
}

#[test]
fn convert_carries_media_between_containers() {
    let png = b"\x89PNG\r\n\x1a\n tiny image".to_vec();
    let data_uri = DataUriResolver::encode("image/png", &png);
    let mut apple = Button::speak("apple", "Apple");
    apple.image = Some(data_uri);

    let mut tree = Tree::new();
    tree.add_page(Page::new("home", "Home").with_button(apple))
        .expect("page");

    let temp_dir = tempdir().expect("temporary directory");
    let obz = temp_dir.path().join("set.obz");
    let sps = temp_dir.path().join("set.sps");
    processor(BoardFormat::Obf)
        .save_from_tree(&tree, &obz)
        .expect("obz saved");

    let loaded = sync::convert(&obz, &sps, None, None, &Settings::default()).expect("converted");
    assert_eq!(loaded.len(), 1);

    let snap = processor(BoardFormat::Snap);
    let restored = snap.load_into_tree(Source::Path(&sps)).expect("snap reloaded");
    let button = &restored.get_page("home").expect("home").buttons[0];
    let resources = snap.open_resources(Source::Path(&sps)).expect("resolver");
    let token = resources.entry_for(button).expect("image token");
    let bytes = resources.fetch(&token).expect("fetched").expect("image present");
    assert_eq!(bytes, png);
}

#[test]
fn convert_rejects_unknown_extensions() {
    let temp_dir = tempdir().expect("temporary directory");
    let input = temp_dir.path().join("board.opml");
    processor(BoardFormat::Opml)
        .save_from_tree(&scenario_tree(), &input)
        .expect("saved");

    let err = sync::convert(
        &input,
        &temp_dir.path().join("board.pdf"),
        None,
        None,
        &Settings::default(),
    )
    .expect_err("pdf is not a board format");
    assert!(matches!(err, ProcessorError::UnsupportedFormat(_)));
}

#[test]
fn missing_input_is_reported() {
    let temp_dir = tempdir().expect("temporary directory");
    let missing = temp_dir.path().join("absent.gridset");
    let err = sync::extract(&missing, None, &Settings::default()).expect_err("missing");
    assert!(matches!(err, ProcessorError::MissingInput(path) if path == missing));
}

#[test]
fn settings_file_feeds_symbol_libraries() {
    let temp_dir = tempdir().expect("temporary directory");
    let library = temp_dir.path().join("symbols");
    fs::create_dir_all(library.join("food")).expect("library dir");
    fs::write(library.join("food/apple.png"), b"apple-bytes").expect("symbol written");

    let config = temp_dir.path().join("settings.json");
    let document = serde_json::json!({
        "symbol_libraries": { "Widgit": library.display().to_string() },
        "default_rows": 2
    });
    fs::write(&config, document.to_string()).expect("config written");
    let settings = Settings::load(&config).expect("settings loaded");
    assert_eq!(settings.default_rows, 2);
    assert_eq!(settings.default_columns, Settings::default().default_columns);

    let mut apple = Button::speak("apple", "Apple");
    apple.image = Some("[widgit]food/apple.png".into());
    let resolver = SymbolLibraryResolver::new(&settings.symbol_libraries);
    let token = resolver.entry_for(&apple).expect("symbol token");
    let bytes = resolver.fetch(&token).expect("fetched").expect("symbol present");
    assert_eq!(bytes, b"apple-bytes");
}
