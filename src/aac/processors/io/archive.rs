use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::aac::processors::error::{ProcessorError, Result};

/// One file inside a zip container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Reads every file entry in archive order. A buffer that is not a zip
/// archive, or an entry that fails to inflate, is a load failure for
/// `format`.
pub fn read_entries(format: &'static str, bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| ProcessorError::load(format, format!("not a zip archive: {err}")))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|err| ProcessorError::load(format, err.to_string()))?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data).map_err(|err| {
            ProcessorError::load(format, format!("corrupt entry {}: {err}", file.name()))
        })?;
        entries.push(ArchiveEntry::new(file.name(), data));
    }
    Ok(entries)
}

/// Packs entries into a zip archive. Timestamps are fixed so identical input
/// produces identical bytes.
pub fn write_entries<'a>(entries: impl IntoIterator<Item = &'a ArchiveEntry>) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    for entry in entries {
        let escapes = entry.name.split(['/', '\\']).any(|part| part == "..");
        if escapes || entry.name.starts_with('/') || entry.name.starts_with('\\') {
            return Err(ProcessorError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid archive entry name {}", entry.name),
            )));
        }
        zip.start_file(entry.name.as_str(), options)?;
        zip.write_all(&entry.data)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Finds an entry by exact name, falling back to a case-insensitive match.
pub fn find_entry<'a>(entries: &'a [ArchiveEntry], name: &str) -> Option<&'a ArchiveEntry> {
    entries
        .iter()
        .find(|entry| entry.name == name)
        .or_else(|| {
            entries
                .iter()
                .find(|entry| entry.name.eq_ignore_ascii_case(name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_is_deterministic() {
        let entries = vec![
            ArchiveEntry::new("a.txt", b"alpha".to_vec()),
            ArchiveEntry::new("dir/b.txt", b"beta".to_vec()),
        ];
        let first = write_entries(&entries).expect("first pack");
        let second = write_entries(&entries).expect("second pack");
        assert_eq!(first, second);

        let read = read_entries("test", &first).expect("read back");
        assert_eq!(read, entries);
        assert!(find_entry(&read, "DIR/B.TXT").is_some());
    }

    #[test]
    fn rejects_non_archives_and_escaping_names() {
        let err = read_entries("gridset", b"not a zip").expect_err("load error");
        assert!(matches!(err, ProcessorError::Load { format: "gridset", .. }));

        for name in ["../evil", "Grids/../../evil", "Grids\\..\\evil", "/etc/evil"] {
            let entries = [ArchiveEntry::new(name, b"x".to_vec())];
            assert!(write_entries(&entries).is_err(), "{name}");
        }
    }

    #[test]
    fn dots_inside_a_name_are_allowed() {
        let entries = [ArchiveEntry::new("Grids/My..Board/grid.xml", b"<Grid/>".to_vec())];
        let packed = write_entries(&entries).expect("pack");
        assert_eq!(read_entries("gridset", &packed).expect("read"), entries);
    }

    #[test]
    fn corrupt_entry_is_a_load_error() {
        let entry = ArchiveEntry::new("board.obf", b"{\"id\": \"home\", \"buttons\": []}".to_vec());
        let mut packed = write_entries([&entry]).expect("pack");
        let central = packed
            .windows(4)
            .position(|window| window == b"PK\x01\x02")
            .expect("central directory");
        packed[central + 16] ^= 0xff;

        let err = read_entries("obf", &packed).expect_err("checksum mismatch");
        assert!(matches!(err, ProcessorError::Load { format: "obf", .. }), "{err}");
    }
}
