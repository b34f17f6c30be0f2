//! Conversion between any two supported formats through the canonical tree.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::io::{BoardFormat, BoardProcessor, Source};
use crate::aac::processors::model::Tree;
use crate::aac::processors::translate::{TranslationMap, translate_file};

/// Format implied by the file extension.
pub fn detect_format(path: &Path) -> Result<BoardFormat> {
    BoardFormat::from_path(path).ok_or_else(|| ProcessorError::UnsupportedFormat(path.to_path_buf()))
}

/// Processor for `path`, honouring an explicit override.
pub fn processor_for(
    path: &Path,
    format: Option<BoardFormat>,
    settings: &Settings,
) -> Result<Box<dyn BoardProcessor>> {
    let format = match format {
        Some(format) => format,
        None => detect_format(path)?,
    };
    Ok(format.processor(settings))
}

/// Loads `input`, then saves the tree to `output` in the target format with
/// media resolved from the input container. Returns the loaded tree.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %input.display(), output = %output.display())
)]
pub fn convert(
    input: &Path,
    output: &Path,
    from: Option<BoardFormat>,
    to: Option<BoardFormat>,
    settings: &Settings,
) -> Result<Tree> {
    let reader = processor_for(input, from, settings)?;
    let writer = processor_for(output, to, settings)?;

    let bytes = Source::Path(input).read()?;
    let source = Source::Bytes(&bytes);
    let tree = reader.load_into_tree(source)?;
    info!(
        from = reader.name(),
        pages = tree.len(),
        root = tree.effective_root_id().unwrap_or(""),
        "loaded board set"
    );

    let resources = reader.open_resources(source)?;
    debug!(to = writer.name(), "saving with source resources");
    writer.save_with_resources(&tree, resources.as_ref(), output)?;
    info!(to = writer.name(), "converted board set");
    Ok(tree)
}

/// Translatable strings of `input`.
#[instrument(level = "info", skip_all, fields(input = %input.display()))]
pub fn extract(input: &Path, from: Option<BoardFormat>, settings: &Settings) -> Result<Vec<String>> {
    let processor = processor_for(input, from, settings)?;
    let texts = processor.extract_texts(Source::Path(input))?;
    info!(format = processor.name(), count = texts.len(), "extracted texts");
    Ok(texts)
}

/// Applies `translations` to `input`, writing `output` in the same format.
pub fn translate(
    input: &Path,
    translations: &TranslationMap,
    output: &Path,
    from: Option<BoardFormat>,
    settings: &Settings,
) -> Result<Vec<u8>> {
    let processor = processor_for(input, from, settings)?;
    translate_file(processor.as_ref(), input, translations, output)
}
