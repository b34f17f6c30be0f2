//! Spreadsheet adapter over the tables built by [`crate::aac::processors::flatten`].
//!
//! Workbooks carry pages, buttons and metadata only. Audio and image bytes
//! are not embedded; image cells keep their resource token.

use std::io::Cursor;
use std::path::Path;

use calamine::{DataType, Range, Reader, Xlsx};
use tracing::{debug, info, instrument};

use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::flatten::{
    BUTTONS_SHEET, METADATA_SHEET, PAGES_SHEET, SheetTable, WorkbookData, build_workbook,
    tree_from_workbook,
};
use crate::aac::processors::io::excel_write::render_workbook;
use crate::aac::processors::io::{BoardFormat, BoardProcessor, Source, write_output};
use crate::aac::processors::model::Tree;
use crate::aac::processors::resource::{ResourceResolver, SymbolLibraryResolver};
use crate::aac::processors::translate::{TranslationMap, translate_tree};

const FORMAT: &str = "excel";

/// Reads and writes `.xlsx` workbooks.
#[derive(Debug, Clone, Default)]
pub struct ExcelProcessor {
    settings: Settings,
}

impl ExcelProcessor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn render(&self, tree: &Tree) -> Result<Vec<u8>> {
        let workbook = build_workbook(tree)?;
        render_workbook(&workbook)
    }
}

/// Reads the known sheets of an `.xlsx` payload into string tables.
pub fn read_workbook(bytes: &[u8]) -> Result<WorkbookData> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|err| ProcessorError::load(FORMAT, err.to_string()))?;

    let mut tables = vec![read_sheet(&mut workbook, PAGES_SHEET)?];
    for optional in [BUTTONS_SHEET, METADATA_SHEET] {
        match read_sheet(&mut workbook, optional) {
            Ok(table) => tables.push(table),
            Err(ProcessorError::Load { .. }) => debug!(sheet = optional, "sheet not present"),
            Err(err) => return Err(err),
        }
    }
    Ok(WorkbookData { tables })
}

fn read_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<SheetTable> {
    let range = workbook
        .worksheet_range(name)
        .ok_or_else(|| ProcessorError::load(FORMAT, format!("missing sheet '{name}'")))??;
    Ok(range_to_table(name, &range))
}

fn range_to_table(name: &str, range: &Range<DataType>) -> SheetTable {
    let mut rows = range
        .rows()
        .map(|row| row.iter().map(|cell| cell_to_string(Some(cell))).collect::<Vec<_>>());
    let columns = rows.next().unwrap_or_default();
    SheetTable {
        sheet_name: name.to_string(),
        columns,
        rows: rows.filter(|row| row.iter().any(|cell| !cell.is_empty())).collect(),
    }
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl BoardProcessor for ExcelProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn extensions(&self) -> &'static [&'static str] {
        BoardFormat::Excel.extensions()
    }

    fn load_into_tree(&self, source: Source<'_>) -> Result<Tree> {
        let bytes = source.read()?;
        if bytes.is_empty() {
            return Ok(Tree::new());
        }
        let workbook = read_workbook(&bytes)?;
        tree_from_workbook(FORMAT, &workbook)
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn save_with_resources(
        &self,
        tree: &Tree,
        _resources: &dyn ResourceResolver,
        destination: &Path,
    ) -> Result<()> {
        let bytes = self.render(tree)?;
        write_output(destination, &bytes)?;
        info!(pages = tree.len(), bytes = bytes.len(), "wrote workbook");
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(output = %destination.display()))]
    fn process_texts(
        &self,
        source: Source<'_>,
        translations: &TranslationMap,
        destination: &Path,
    ) -> Result<Vec<u8>> {
        let mut tree = self.load_into_tree(source)?;
        let changed = translate_tree(&mut tree, translations);
        let bytes = self.render(&tree)?;
        write_output(destination, &bytes)?;
        info!(changed, "translated workbook");
        Ok(bytes)
    }

    fn open_resources(&self, _source: Source<'_>) -> Result<Box<dyn ResourceResolver>> {
        Ok(Box::new(SymbolLibraryResolver::new(
            &self.settings.symbol_libraries,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aac::processors::model::{Button, Page};

    #[test]
    fn workbook_bytes_round_trip() {
        let mut tree = Tree::new();
        tree.add_page(Page::new("home", "Home").with_button(Button::speak("b1", "Hi")))
            .expect("page");
        tree.metadata.name = Some("Demo".into());

        let processor = ExcelProcessor::default();
        let bytes = processor.render(&tree).expect("render");
        let back = processor
            .load_into_tree(Source::Bytes(&bytes))
            .expect("load");
        assert_eq!(back, tree);
    }

    #[test]
    fn garbage_is_a_load_error() {
        let err = ExcelProcessor::default()
            .load_into_tree(Source::Bytes(b"not a workbook"))
            .expect_err("garbage");
        assert!(matches!(err, ProcessorError::Load { .. }));
    }
}
