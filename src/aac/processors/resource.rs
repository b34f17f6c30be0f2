//! Resolution of image and audio references into bytes.
//!
//! Buttons carry opaque tokens that point back into whatever container they
//! were loaded from. Resolution is two-phase: [`ResourceResolver::entry_for`]
//! classifies a button's reference without touching storage, and
//! [`ResourceResolver::fetch`] reads the bytes only when a caller needs them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rusqlite::{Connection, OptionalExtension};
use tempfile::NamedTempFile;
use tracing::debug;
use zip::ZipArchive;

use crate::aac::processors::error::Result;
use crate::aac::processors::model::{Button, Tree, sha1_hex};

/// Prefix for image identifiers in content-addressed stores.
pub const IMAGE_ID_PREFIX: &str = "IMG:";

const BLOB_PREFIX: &str = "blob:";

/// Classified reference to a stored resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryToken {
    /// Path of an entry inside a zip container.
    ArchiveEntry(String),
    /// Row id inside a SQLite blob table.
    BlobRow(i64),
    /// Inline `data:` URI.
    DataUri(String),
    /// `[LIBRARY]path` reference into a symbol library.
    Symbol { library: String, path: String },
}

impl EntryToken {
    /// Classifies a raw reference. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("data:") {
            return Some(EntryToken::DataUri(raw.to_string()));
        }
        if let Some(row) = raw.strip_prefix(BLOB_PREFIX) {
            if let Ok(row) = row.parse() {
                return Some(EntryToken::BlobRow(row));
            }
        }
        if let Some(rest) = raw.strip_prefix('[') {
            if let Some((library, path)) = rest.split_once(']') {
                if !library.is_empty() && !path.is_empty() {
                    return Some(EntryToken::Symbol {
                        library: library.to_string(),
                        path: path.to_string(),
                    });
                }
            }
        }

        let path = raw.replace('\\', "/");
        let path = path.trim_start_matches("./").trim_start_matches('/');
        Some(EntryToken::ArchiveEntry(path.to_string()))
    }

    /// Token for a blob table row.
    pub fn blob_row(id: i64) -> Self {
        EntryToken::BlobRow(id)
    }
}

impl fmt::Display for EntryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryToken::ArchiveEntry(path) => f.write_str(path),
            EntryToken::BlobRow(id) => write!(f, "{BLOB_PREFIX}{id}"),
            EntryToken::DataUri(uri) => f.write_str(uri),
            EntryToken::Symbol { library, path } => write!(f, "[{library}]{path}"),
        }
    }
}

/// Looks up resource bytes for buttons loaded from one container.
pub trait ResourceResolver {
    /// Classifies the image reference carried by `button`.
    fn entry_for(&self, button: &Button) -> Option<EntryToken> {
        button.image.as_deref().and_then(EntryToken::parse)
    }

    /// Reads the bytes behind `token`. A token this resolver does not know
    /// about, or whose entry is gone, yields `Ok(None)`.
    fn fetch(&self, token: &EntryToken) -> Result<Option<Vec<u8>>>;
}

/// Resolver that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResources;

impl ResourceResolver for NoResources {
    fn fetch(&self, _token: &EntryToken) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Reads entries out of an in-memory zip archive.
pub struct ArchiveResolver {
    bytes: Vec<u8>,
    names: BTreeMap<String, String>,
}

impl ArchiveResolver {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;
        let names = archive
            .file_names()
            .map(|name| (name.to_ascii_lowercase(), name.to_string()))
            .collect();
        Ok(Self { bytes, names })
    }

    /// Entry names in the archive.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }
}

impl ResourceResolver for ArchiveResolver {
    fn fetch(&self, token: &EntryToken) -> Result<Option<Vec<u8>>> {
        let EntryToken::ArchiveEntry(path) = token else {
            return Ok(None);
        };
        // Vendors are inconsistent about case in entry references.
        let Some(name) = self.names.get(&path.to_ascii_lowercase()) else {
            debug!(entry = %path, "archive entry not found");
            return Ok(None);
        };

        let mut archive = ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;
        let mut file = archive.by_name(name)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }
}

/// Reads rows out of a SQLite table holding binary data.
pub struct BlobTableResolver {
    connection: Connection,
    table: String,
    id_column: String,
    data_column: String,
    // Dropped after the connection.
    _file: Option<NamedTempFile>,
}

impl BlobTableResolver {
    /// Wraps an open connection. `file` keeps a temporary database alive for
    /// as long as the resolver needs it.
    pub fn new(
        connection: Connection,
        file: Option<NamedTempFile>,
        table: &str,
        id_column: &str,
        data_column: &str,
    ) -> Self {
        Self {
            connection,
            table: table.to_string(),
            id_column: id_column.to_string(),
            data_column: data_column.to_string(),
            _file: file,
        }
    }
}

impl ResourceResolver for BlobTableResolver {
    fn fetch(&self, token: &EntryToken) -> Result<Option<Vec<u8>>> {
        let EntryToken::BlobRow(id) = token else {
            return Ok(None);
        };
        if !crate::aac::processors::io::sqlite::table_exists(&self.connection, &self.table)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = ?1",
            self.data_column, self.table, self.id_column
        );
        let data = self
            .connection
            .query_row(&sql, [id], |row| row.get::<_, Option<Vec<u8>>>(0))
            .optional()?
            .flatten();
        Ok(data)
    }
}

/// Decodes inline `data:` URIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataUriResolver;

impl DataUriResolver {
    /// Splits a data URI into its media type and decoded payload.
    pub fn decode(uri: &str) -> Option<(String, Vec<u8>)> {
        let rest = uri.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let (media_type, is_base64) = match header.strip_suffix(";base64") {
            Some(media_type) => (media_type, true),
            None => (header, false),
        };
        let data = if is_base64 {
            STANDARD.decode(payload.trim()).ok()?
        } else {
            percent_decode(payload)
        };
        let media_type = if media_type.is_empty() {
            "text/plain".to_string()
        } else {
            media_type.to_string()
        };
        Some((media_type, data))
    }

    /// Encodes bytes as a base64 data URI.
    pub fn encode(media_type: &str, data: &[u8]) -> String {
        format!("data:{media_type};base64,{}", STANDARD.encode(data))
    }
}

impl ResourceResolver for DataUriResolver {
    fn fetch(&self, token: &EntryToken) -> Result<Option<Vec<u8>>> {
        match token {
            EntryToken::DataUri(uri) => Ok(Self::decode(uri).map(|(_, data)| data)),
            _ => Ok(None),
        }
    }
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[index + 1..index + 3]).ok();
            if let Some(value) = hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                out.push(value);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    out
}

/// Reads `[LIBRARY]path` symbols from library directories on disk.
#[derive(Debug, Default, Clone)]
pub struct SymbolLibraryResolver {
    roots: BTreeMap<String, PathBuf>,
}

impl SymbolLibraryResolver {
    /// Library names are matched case-insensitively.
    pub fn new(roots: &BTreeMap<String, PathBuf>) -> Self {
        Self {
            roots: roots
                .iter()
                .map(|(name, root)| (name.to_ascii_lowercase(), root.clone()))
                .collect(),
        }
    }
}

impl ResourceResolver for SymbolLibraryResolver {
    fn fetch(&self, token: &EntryToken) -> Result<Option<Vec<u8>>> {
        let EntryToken::Symbol { library, path } = token else {
            return Ok(None);
        };
        let Some(root) = self.roots.get(&library.to_ascii_lowercase()) else {
            debug!(library = %library, "symbol library not configured");
            return Ok(None);
        };
        let relative = Path::new(path.trim_start_matches(['/', '\\']));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Ok(None);
        }
        let full = root.join(relative);
        if !full.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(full)?))
    }
}

/// Tries each resolver in turn; the first hit wins.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Box<dyn ResourceResolver>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Box<dyn ResourceResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn push(&mut self, resolver: Box<dyn ResourceResolver>) {
        self.resolvers.push(resolver);
    }
}

impl ResourceResolver for ChainResolver {
    fn entry_for(&self, button: &Button) -> Option<EntryToken> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.entry_for(button))
    }

    fn fetch(&self, token: &EntryToken) -> Result<Option<Vec<u8>>> {
        for resolver in &self.resolvers {
            if let Some(data) = resolver.fetch(token)? {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

/// Every image token referenced by the tree's buttons. Media outside this set
/// is dropped when an archive is repacked.
pub fn allowed_entries(tree: &Tree) -> BTreeSet<EntryToken> {
    tree.pages()
        .flat_map(|page| page.buttons.iter())
        .filter_map(|button| button.image.as_deref().and_then(EntryToken::parse))
        .collect()
}

/// A blob held by a [`BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub ref_count: u32,
}

/// Content-addressed blob storage with explicit reference counts.
///
/// Identical bytes collapse to one entry. [`BlobStore::attach`] increments the
/// count, [`BlobStore::detach`] decrements it, and the entry is only removed
/// once the count reaches zero.
#[derive(Debug, Default, Clone)]
pub struct BlobStore {
    blobs: BTreeMap<String, StoredBlob>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier for `data` under `prefix` (`SND:` or `IMG:`).
    pub fn identifier(prefix: &str, data: &[u8]) -> String {
        format!("{prefix}{}", sha1_hex(data))
    }

    /// Stores `data` (or bumps its count) and returns its identifier.
    pub fn attach(&mut self, prefix: &str, data: &[u8]) -> String {
        let identifier = Self::identifier(prefix, data);
        self.blobs
            .entry(identifier.clone())
            .and_modify(|blob| blob.ref_count += 1)
            .or_insert_with(|| StoredBlob {
                data: data.to_vec(),
                ref_count: 1,
            });
        identifier
    }

    /// Drops one reference. Returns `true` when the blob was removed.
    pub fn detach(&mut self, identifier: &str) -> bool {
        let Some(blob) = self.blobs.get_mut(identifier) else {
            return false;
        };
        blob.ref_count = blob.ref_count.saturating_sub(1);
        if blob.ref_count == 0 {
            self.blobs.remove(identifier);
            return true;
        }
        false
    }

    pub fn get(&self, identifier: &str) -> Option<&StoredBlob> {
        self.blobs.get(identifier)
    }

    pub fn ref_count(&self, identifier: &str) -> u32 {
        self.blobs.get(identifier).map_or(0, |blob| blob.ref_count)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Blobs in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoredBlob)> {
        self.blobs.iter().map(|(id, blob)| (id.as_str(), blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aac::processors::model::AUDIO_ID_PREFIX;

    #[test]
    fn classifies_tokens() {
        assert_eq!(EntryToken::parse("  "), None);
        assert_eq!(EntryToken::parse("blob:12"), Some(EntryToken::BlobRow(12)));
        assert_eq!(
            EntryToken::parse("[WIDGIT]food/apple.emf"),
            Some(EntryToken::Symbol {
                library: "WIDGIT".into(),
                path: "food/apple.emf".into()
            })
        );
        assert_eq!(
            EntryToken::parse(".\\Grids\\Home\\a.png"),
            Some(EntryToken::ArchiveEntry("Grids/Home/a.png".into()))
        );
        assert!(matches!(
            EntryToken::parse("data:image/png;base64,AAAA"),
            Some(EntryToken::DataUri(_))
        ));
        assert_eq!(EntryToken::BlobRow(3).to_string(), "blob:3");
    }

    #[test]
    fn decodes_data_uris() {
        let uri = DataUriResolver::encode("image/png", b"png-bytes");
        let token = EntryToken::parse(&uri).expect("token");
        let data = DataUriResolver.fetch(&token).expect("fetch");
        assert_eq!(data.as_deref(), Some(&b"png-bytes"[..]));

        let (media, plain) = DataUriResolver::decode("data:,hello%20world").expect("plain uri");
        assert_eq!(media, "text/plain");
        assert_eq!(plain, b"hello world");
    }

    #[test]
    fn identical_audio_is_stored_once() {
        let mut store = BlobStore::new();
        let first = store.attach(AUDIO_ID_PREFIX, b"voice");
        let second = store.attach(AUDIO_ID_PREFIX, b"voice");
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.ref_count(&first), 2);

        assert!(!store.detach(&first));
        assert_eq!(store.ref_count(&first), 1);
        assert!(store.detach(&first));
        assert!(store.is_empty());
        assert!(!store.detach(&first));
    }

    #[test]
    fn chain_returns_first_hit_and_missing_is_none() {
        let chain = ChainResolver::new(vec![Box::new(NoResources), Box::new(DataUriResolver)]);
        let token = EntryToken::parse("data:;base64,aGk=").expect("token");
        assert_eq!(chain.fetch(&token).expect("fetch"), Some(b"hi".to_vec()));
        let missing = EntryToken::ArchiveEntry("nope.png".into());
        assert_eq!(chain.fetch(&missing).expect("fetch"), None);
    }

    #[test]
    fn symbol_library_rejects_escaping_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("apple.png"), b"apple").expect("write symbol");
        let roots = BTreeMap::from([("Widgit".to_string(), dir.path().to_path_buf())]);
        let resolver = SymbolLibraryResolver::new(&roots);

        let hit = EntryToken::parse("[WIDGIT]apple.png").expect("token");
        assert_eq!(resolver.fetch(&hit).expect("fetch"), Some(b"apple".to_vec()));
        let escape = EntryToken::parse("[WIDGIT]../secret").expect("token");
        assert_eq!(resolver.fetch(&escape).expect("fetch"), None);
    }
}
