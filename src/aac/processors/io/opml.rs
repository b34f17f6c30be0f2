//! OPML outlines.
//!
//! An outline is a tree, so loading wraps it in a fixed chain of pages:
//! a "Super Root" page links to a "Root" page, which links to the page for
//! the first top-level outline. Outlines with children become pages; leaves
//! become speak buttons. Page and button ids are UUIDv5 over the outline path
//! so reloading the same file yields the same ids.
//!
//! Two outline types carry navigation a plain tree cannot: `type="page"`
//! marks a childless outline that is still a page, and `type="link"` with
//! `url="#<path>"` points back at an outline already written elsewhere.

use std::collections::HashMap;
use std::path::Path;

use regex::{Captures, Regex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::io::xml::{
    XmlOut, child, children, decode_utf8, descend, parse_document, text_of,
};
use crate::aac::processors::io::{BoardFormat, BoardProcessor, Source, write_output};
use crate::aac::processors::model::{Button, GridLayout, Page, Tree};
use crate::aac::processors::resource::ResourceResolver;
use crate::aac::processors::translate::TranslationMap;

const FORMAT: &str = "opml";
const SUPER_ROOT_NAME: &str = "Super Root";
const ROOT_NAME: &str = "Root";
const DEFAULT_MAIN_NAME: &str = "Main Page";
const DEFAULT_TITLE: &str = "AAC Tree Export";
const PAGE_TYPE: &str = "page";
const LINK_TYPE: &str = "link";
const MAIN_PATH: &str = "main";
const OUTLINE_TEXT: &str = r#"(<outline\b[^>]*?\stext=)(?:"([^"]*)"|'([^']*)')"#;

/// Reads and writes OPML outlines.
#[derive(Debug, Clone, Default)]
pub struct OpmlProcessor {
    settings: Settings,
}

impl OpmlProcessor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

fn page_id(path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("opml:page:{path}").as_bytes()).to_string()
}

fn button_id(path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("opml:button:{path}").as_bytes()).to_string()
}

impl BoardProcessor for OpmlProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn extensions(&self) -> &'static [&'static str] {
        BoardFormat::Opml.extensions()
    }

    fn load_into_tree(&self, source: Source<'_>) -> Result<Tree> {
        let bytes = source.read()?;
        let mut tree = Tree::new();
        if bytes.is_empty() {
            return Ok(tree);
        }
        let text = decode_utf8(FORMAT, &bytes)?;
        let document = parse_document(FORMAT, text)?;
        let root = document.root_element();
        if !root.has_tag_name("opml") {
            return Err(ProcessorError::load(
                FORMAT,
                format!("root element is <{}>, expected <opml>", root.tag_name().name()),
            ));
        }

        tree.metadata.name = descend(root, "head/title").and_then(text_of);
        tree.metadata.language = self.settings.default_language.clone();
        let Some(body) = child(root, "body") else {
            debug!("outline has no body");
            return Ok(tree);
        };
        let Some(main_outline) = children(body, "outline").next() else {
            debug!("outline body is empty");
            return Ok(tree);
        };

        let super_root_id = page_id("super-root");
        let root_id = page_id("root");
        let main_id = page_id(MAIN_PATH);
        let main_name = main_outline
            .attribute("text")
            .filter(|text| !text.is_empty())
            .unwrap_or(DEFAULT_MAIN_NAME)
            .to_string();

        let mut super_root = Page::new(super_root_id.clone(), SUPER_ROOT_NAME);
        super_root.grid = Some(GridLayout::new(1, 1));
        let mut link = Button::navigate(button_id("super-root"), ROOT_NAME, root_id.clone());
        link.position = Some((0, 0));
        super_root.buttons.push(link);

        let mut root_page = Page::new(root_id.clone(), ROOT_NAME);
        root_page.grid = Some(GridLayout::new(1, 1));
        root_page.parent_id = Some(super_root_id.clone());
        let mut link = Button::navigate(button_id("root"), main_name.clone(), main_id.clone());
        link.position = Some((0, 0));
        root_page.buttons.push(link);

        let categories: Vec<_> = children(main_outline, "outline").collect();
        let mut main_page = Page::new(main_id.clone(), main_name);
        main_page.grid = Some(GridLayout::new(1, categories.len().max(1) as u32));
        main_page.parent_id = Some(root_id);
        for (index, category) in categories.into_iter().enumerate() {
            if let Some(button) =
                load_outline(&mut tree, category, &main_id, &format!("{MAIN_PATH}/{index}"), index)?
            {
                main_page.buttons.push(button);
            }
        }

        tree.add_page(main_page)?;
        tree.add_page(root_page)?;
        tree.add_page(super_root)?;
        tree.root_id = Some(super_root_id);
        debug!(pages = tree.len(), "loaded outline");
        Ok(tree)
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn save_with_resources(
        &self,
        tree: &Tree,
        _resources: &dyn ResourceResolver,
        destination: &Path,
    ) -> Result<()> {
        let bytes = render(tree)?;
        write_output(destination, &bytes)?;
        info!(pages = tree.len(), bytes = bytes.len(), "wrote outline");
        Ok(())
    }

    fn extract_texts(&self, source: Source<'_>) -> Result<Vec<String>> {
        let bytes = source.read()?;
        let mut texts = Vec::new();
        if bytes.is_empty() {
            return Ok(texts);
        }
        let text = decode_utf8(FORMAT, &bytes)?;
        let document = parse_document(FORMAT, text)?;
        if let Some(body) = child(document.root_element(), "body") {
            collect_outline_texts(body, &mut texts);
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
        let bytes = source.read()?;
        if bytes.is_empty() {
            write_output(destination, &[])?;
            return Ok(Vec::new());
        }
        let text = decode_utf8(FORMAT, &bytes)?;
        parse_document(FORMAT, text)?;

        let output = translate_outline_texts(text, translations)?;
        write_output(destination, output.as_bytes())?;
        info!(bytes = output.len(), "translated outline");
        Ok(output.into_bytes())
    }
}

fn load_outline(
    tree: &mut Tree,
    outline: roxmltree::Node<'_, '_>,
    parent_id: &str,
    path: &str,
    index: usize,
) -> Result<Option<Button>> {
    let text = outline.attribute("text").unwrap_or_default();
    if text.is_empty() {
        return Ok(None);
    }
    let position = Some((index as u32, 0));

    if let Some(target) = link_target(outline) {
        let mut button = Button::navigate(button_id(path), text, page_id(target));
        button.position = position;
        return Ok(Some(button));
    }

    let nested: Vec<_> = children(outline, "outline").collect();
    if nested.is_empty() && outline.attribute("type") != Some(PAGE_TYPE) {
        let mut button = Button::speak(button_id(path), text);
        button.position = position;
        return Ok(Some(button));
    }

    let id = page_id(path);
    let mut page = Page::new(id.clone(), text);
    page.grid = Some(GridLayout::new(1, nested.len().max(1) as u32));
    page.parent_id = Some(parent_id.to_string());
    for (child_index, node) in nested.into_iter().enumerate() {
        if let Some(button) =
            load_outline(tree, node, &id, &format!("{path}/{child_index}"), child_index)?
        {
            page.buttons.push(button);
        }
    }
    tree.add_page(page)?;

    let mut button = Button::navigate(button_id(path), text, id);
    button.position = position;
    Ok(Some(button))
}

/// Outline path named by an in-document link (`type="link" url="#main/0"`).
fn link_target<'a>(outline: roxmltree::Node<'a, '_>) -> Option<&'a str> {
    if outline.attribute("type") != Some(LINK_TYPE) {
        return None;
    }
    outline.attribute("url")?.strip_prefix('#')
}

/// Page the outline starts at, with the number of wrapper pages skipped to
/// reach it. Trees loaded from OPML are unwrapped from their
/// "Super Root" → "Root" chain; other trees start at their root.
fn main_page(tree: &Tree) -> Option<(&Page, usize)> {
    let root = tree.effective_root_id().and_then(|id| tree.get_page(id))?;
    let follow = |page: &Page, name: &str| {
        (page.name == name)
            .then(|| page.buttons.first())
            .flatten()
            .and_then(Button::navigation_target)
            .and_then(|target| tree.get_page(target))
    };
    match follow(root, SUPER_ROOT_NAME).and_then(|page| follow(page, ROOT_NAME)) {
        Some(main) => Some((main, 2)),
        None => Some((root, 0)),
    }
}

/// Serializes the part of the tree reachable from its main page. Pages the
/// walk does not reach have no place in an outline and are dropped.
fn render(tree: &Tree) -> Result<Vec<u8>> {
    let mut out = XmlOut::new()?;
    out.start("opml", &[("version", "2.0")])?;
    out.start("head", &[])?;
    out.text_element("title", tree.metadata.name.as_deref().unwrap_or(DEFAULT_TITLE))?;
    out.end("head")?;
    out.start("body", &[])?;
    if let Some((main, wrappers)) = main_page(tree) {
        let mut written = HashMap::from([(main.id.as_str(), MAIN_PATH.to_string())]);
        out.start("outline", &[("text", main.name.as_str())])?;
        write_buttons(&mut out, tree, main, MAIN_PATH, &mut written)?;
        out.end("outline")?;
        let dropped = tree.len().saturating_sub(written.len() + wrappers);
        if dropped > 0 {
            warn!(dropped, "pages outside the outline were not written");
        }
    }
    out.end("body")?;
    out.end("opml")?;
    Ok(out.finish())
}

/// Writes one outline per button. A page is nested under the first button
/// that reaches it; later buttons link to that outline by path. `written`
/// maps page ids to the outline path they were written at.
fn write_buttons<'t>(
    out: &mut XmlOut,
    tree: &'t Tree,
    page: &'t Page,
    path: &str,
    written: &mut HashMap<&'t str, String>,
) -> Result<()> {
    for (index, button) in page.buttons.iter().enumerate() {
        let label = button.label.as_str();
        let Some(target) = button
            .navigation_target()
            .and_then(|target| tree.get_page(target))
        else {
            out.empty("outline", &[("text", label)])?;
            continue;
        };

        if let Some(existing) = written.get(target.id.as_str()) {
            let url = format!("#{existing}");
            let attrs = [("text", label), ("type", LINK_TYPE), ("url", url.as_str())];
            out.empty("outline", &attrs)?;
            continue;
        }

        let child_path = format!("{path}/{index}");
        written.insert(target.id.as_str(), child_path.clone());
        if target.buttons.is_empty() {
            out.empty("outline", &[("text", label), ("type", PAGE_TYPE)])?;
        } else {
            out.start("outline", &[("text", label)])?;
            write_buttons(out, tree, target, &child_path, written)?;
            out.end("outline")?;
        }
    }
    Ok(())
}

fn collect_outline_texts(node: roxmltree::Node<'_, '_>, texts: &mut Vec<String>) {
    for outline in children(node, "outline") {
        if let Some(text) = outline.attribute("text").map(str::trim) {
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }
        collect_outline_texts(outline, texts);
    }
}

/// Rewrites `text` attribute values of `<outline>` elements in place. The
/// rest of the document is left byte for byte.
fn translate_outline_texts(document: &str, translations: &TranslationMap) -> Result<String> {
    let pattern = Regex::new(OUTLINE_TEXT).map_err(ProcessorError::xml)?;
    let mut failure = None;
    let output = pattern.replace_all(document, |caps: &Captures<'_>| {
        let (raw, quote) = match (caps.get(2), caps.get(3)) {
            (Some(value), _) => (value.as_str(), '"'),
            (None, Some(value)) => (value.as_str(), '\''),
            (None, None) => ("", '"'),
        };
        let value = match quick_xml::escape::unescape(raw) {
            Ok(value) => value,
            Err(err) => {
                failure.get_or_insert(ProcessorError::xml(err));
                return caps[0].to_string();
            }
        };
        match translations.lookup(&value) {
            Some(replacement) => format!(
                "{}{quote}{}{quote}",
                &caps[1],
                quick_xml::escape::escape(replacement.as_str())
            ),
            None => caps[0].to_string(),
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(output.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Core</title></head>
  <body>
    <outline text="Home">
      <outline text="Food">
        <outline text="Apple"/>
        <outline text=" Bread "/>
      </outline>
      <outline text="Hello"/>
    </outline>
  </body>
</opml>
"#;

    #[test]
    fn loads_wrapped_outline() {
        let tree = OpmlProcessor::default()
            .load_into_tree(Source::Bytes(SAMPLE.as_bytes()))
            .expect("load");
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.root_page().map(|page| page.name.as_str()), Some(SUPER_ROOT_NAME));
        let (main, wrappers) = main_page(&tree).expect("main page");
        assert_eq!(wrappers, 2);
        assert_eq!(main.name, "Home");
        assert_eq!(main.buttons.len(), 2);
        let food = tree
            .get_page(main.buttons[0].navigation_target().expect("navigates"))
            .expect("food page");
        assert_eq!(food.buttons[1].label, " Bread ");
        assert_eq!(food.buttons[1].position, Some((1, 0)));
    }

    #[test]
    fn ids_are_stable_across_loads() {
        let processor = OpmlProcessor::default();
        let first = processor.load_into_tree(Source::Bytes(SAMPLE.as_bytes())).expect("load");
        let second = processor.load_into_tree(Source::Bytes(SAMPLE.as_bytes())).expect("load");
        assert_eq!(first, second);
    }

    #[test]
    fn extraction_trims_depth_first() {
        let texts = OpmlProcessor::default()
            .extract_texts(Source::Bytes(SAMPLE.as_bytes()))
            .expect("extract");
        assert_eq!(texts, vec!["Home", "Food", "Apple", "Bread", "Hello"]);
    }

    #[test]
    fn substitution_touches_only_text_values() {
        let map = TranslationMap::from_pairs([
            (Some("Bread".into()), Some("Pain & beurre".into())),
            (Some("Core".into()), Some("Noyau".into())),
        ]);
        let output = translate_outline_texts(SAMPLE, &map).expect("translate");
        assert!(output.contains(r#"<outline text=" Pain &amp; beurre "/>"#));
        assert!(output.contains("<title>Core</title>"));
    }

    fn reload(tree: &Tree) -> Tree {
        let bytes = render(tree).expect("render");
        OpmlProcessor::default()
            .load_into_tree(Source::Bytes(&bytes))
            .expect("reload")
    }

    #[test]
    fn link_to_empty_page_still_navigates() {
        let mut tree = Tree::new();
        tree.add_page(
            Page::new("home", "Home")
                .with_button(Button::navigate("b1", "Food", "food"))
                .with_button(Button::speak("b2", "Hello")),
        )
        .expect("home");
        tree.add_page(Page::new("food", "Food")).expect("food");
        tree.root_id = Some("home".into());

        let restored = reload(&tree);
        let (main, _) = main_page(&restored).expect("main page");
        let food = main.buttons[0]
            .navigation_target()
            .and_then(|target| restored.get_page(target))
            .expect("food page");
        assert_eq!(food.name, "Food");
        assert!(food.buttons.is_empty());
        assert_eq!(main.buttons[1].navigation_target(), None);
    }

    #[test]
    fn back_links_point_at_the_written_outline() {
        let mut tree = Tree::new();
        tree.add_page(Page::new("home", "Home").with_button(Button::navigate("b1", "Food", "food")))
            .expect("home");
        tree.add_page(
            Page::new("food", "Food")
                .with_button(Button::speak("b2", "Apple"))
                .with_button(Button::navigate("b3", "Back", "home")),
        )
        .expect("food");
        tree.root_id = Some("home".into());

        let bytes = String::from_utf8(render(&tree).expect("render")).expect("utf8");
        assert!(bytes.contains(r##"type="link" url="#main""##), "{bytes}");

        let restored = reload(&tree);
        let (main, _) = main_page(&restored).expect("main page");
        let food = restored
            .get_page(main.buttons[0].navigation_target().expect("navigates"))
            .expect("food page");
        assert_eq!(food.buttons[1].navigation_target(), Some(main.id.as_str()));
    }

    #[test]
    fn foreign_root_is_a_load_error() {
        let err = OpmlProcessor::default()
            .load_into_tree(Source::Bytes(b"<html><body/></html>"))
            .expect_err("not opml");
        assert!(matches!(err, ProcessorError::Load { format: "opml", .. }));
    }
}
