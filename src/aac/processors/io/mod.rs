//! Format adapters.
//!
//! Every vendor format implements [`BoardProcessor`]: load into the canonical
//! [`Tree`], save from it, extract translatable strings, and apply a
//! translation map to a file.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::aac::processors::config::Settings;
use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::model::Tree;
use crate::aac::processors::resource::{DataUriResolver, NoResources, ResourceResolver};
use crate::aac::processors::translate::{TranslationMap, extract_tree_texts};

pub mod archive;
pub mod excel_read;
pub mod excel_write;
pub mod gridset;
pub mod obf;
pub mod opml;
pub mod snap;
pub mod sqlite;
pub mod touchchat;
pub mod xml;

pub use excel_read::ExcelProcessor;
pub use gridset::GridsetProcessor;
pub use obf::ObfProcessor;
pub use opml::OpmlProcessor;
pub use snap::SnapProcessor;
pub use touchchat::TouchChatProcessor;

/// Where a processor reads from.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

impl<'a> Source<'a> {
    /// Reads the whole source. A missing path is reported as such rather than
    /// as a generic IO failure.
    pub fn read(&self) -> Result<Cow<'a, [u8]>> {
        match self {
            Source::Path(path) => {
                if !path.exists() {
                    return Err(ProcessorError::MissingInput(path.to_path_buf()));
                }
                Ok(Cow::Owned(fs::read(path)?))
            }
            Source::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }

    pub fn path(&self) -> Option<&'a Path> {
        match self {
            Source::Path(path) => Some(path),
            Source::Bytes(_) => None,
        }
    }
}

impl<'a> From<&'a Path> for Source<'a> {
    fn from(path: &'a Path) -> Self {
        Source::Path(path)
    }
}

impl<'a> From<&'a PathBuf> for Source<'a> {
    fn from(path: &'a PathBuf) -> Self {
        Source::Path(path.as_path())
    }
}

impl<'a> From<&'a [u8]> for Source<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Source::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Source<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Source::Bytes(bytes.as_slice())
    }
}

/// Uniform contract implemented by every format adapter.
pub trait BoardProcessor {
    /// Short format name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Lowercase file extensions the processor handles, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn can_process(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions()
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }

    /// Builds a fresh tree from the source. Empty input yields an empty tree;
    /// structural corruption is a [`ProcessorError::Load`].
    fn load_into_tree(&self, source: Source<'_>) -> Result<Tree>;

    /// Writes `tree` to `destination`, pulling media bytes from `resources`.
    fn save_with_resources(
        &self,
        tree: &Tree,
        resources: &dyn ResourceResolver,
        destination: &Path,
    ) -> Result<()>;

    /// Saves without a source container. Only inline `data:` media can be
    /// carried.
    fn save_from_tree(&self, tree: &Tree, destination: &Path) -> Result<()> {
        self.save_with_resources(tree, &DataUriResolver, destination)
    }

    /// Translatable strings in source order, duplicates kept.
    fn extract_texts(&self, source: Source<'_>) -> Result<Vec<String>> {
        Ok(extract_tree_texts(&self.load_into_tree(source)?))
    }

    /// Applies `translations` and writes the result to `destination`,
    /// returning the bytes written. Strings without a rule are left alone.
    fn process_texts(
        &self,
        source: Source<'_>,
        translations: &TranslationMap,
        destination: &Path,
    ) -> Result<Vec<u8>>;

    /// Resolver for media referenced by trees loaded from `source`.
    fn open_resources(&self, _source: Source<'_>) -> Result<Box<dyn ResourceResolver>> {
        Ok(Box::new(NoResources))
    }
}

/// Supported board formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BoardFormat {
    Gridset,
    Snap,
    #[value(name = "touchchat")]
    TouchChat,
    Opml,
    Obf,
    Excel,
}

impl BoardFormat {
    pub const ALL: [BoardFormat; 6] = [
        BoardFormat::Gridset,
        BoardFormat::Snap,
        BoardFormat::TouchChat,
        BoardFormat::Opml,
        BoardFormat::Obf,
        BoardFormat::Excel,
    ];

    /// Extensions recognised for the format, without the dot.
    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            BoardFormat::Gridset => &["gridset"],
            BoardFormat::Snap => &["sps", "spb"],
            BoardFormat::TouchChat => &["ce"],
            BoardFormat::Opml => &["opml"],
            BoardFormat::Obf => &["obf", "obz"],
            BoardFormat::Excel => &["xlsx"],
        }
    }

    /// Format implied by a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL.into_iter().find(|format| {
            format
                .extensions()
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
    }

    /// A processor for this format.
    pub fn processor(self, settings: &Settings) -> Box<dyn BoardProcessor> {
        let settings = settings.clone();
        match self {
            BoardFormat::Gridset => Box::new(GridsetProcessor::new(settings)),
            BoardFormat::Snap => Box::new(SnapProcessor::new(settings)),
            BoardFormat::TouchChat => Box::new(TouchChatProcessor::new(settings)),
            BoardFormat::Opml => Box::new(OpmlProcessor::new(settings)),
            BoardFormat::Obf => Box::new(ObfProcessor::new(settings)),
            BoardFormat::Excel => Box::new(ExcelProcessor::new(settings)),
        }
    }
}

/// Writes `bytes` to `destination`, creating parent directories.
pub(crate) fn write_output(destination: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| ProcessorError::save(destination, err))?;
        }
    }
    fs::write(destination, bytes).map_err(|err| ProcessorError::save(destination, err))
}
