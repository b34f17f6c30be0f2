use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use rusqlite::{Connection, OpenFlags, params};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::aac::processors::error::{ProcessorError, Result};
use crate::aac::processors::translate::TranslationMap;

/// Header every SQLite 3 database file starts with.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Fails with a load error unless `header` starts with the SQLite magic.
pub fn check_magic(format: &'static str, header: &[u8]) -> Result<()> {
    if header.len() < SQLITE_MAGIC.len() || &header[..SQLITE_MAGIC.len()] != SQLITE_MAGIC {
        return Err(ProcessorError::load(
            format,
            "database header does not carry the SQLite magic",
        ));
    }
    Ok(())
}

/// A database materialised from memory into a temporary file. The file is
/// removed when the value is dropped.
pub struct ScopedDatabase {
    pub connection: Connection,
    file: NamedTempFile,
}

impl ScopedDatabase {
    /// Writes `bytes` to a fresh temporary file and opens it read-write.
    pub fn materialize(format: &'static str, bytes: &[u8]) -> Result<Self> {
        check_magic(format, bytes)?;
        let mut file = NamedTempFile::new()?;
        file.write_all(bytes)?;
        file.flush()?;
        let connection = Connection::open(file.path())?;
        debug!(format, path = %file.path().display(), "materialised database");
        Ok(Self { connection, file })
    }

    /// Creates an empty database in a temporary file.
    pub fn create() -> Result<Self> {
        let file = NamedTempFile::new()?;
        let connection = Connection::open(file.path())?;
        Ok(Self { connection, file })
    }

    /// Closes the connection and returns the database file's bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let Self { connection, file } = self;
        connection.close().map_err(|(_, err)| err)?;
        Ok(fs::read(file.path())?)
    }

    /// Splits into the connection and the file guard keeping it alive.
    pub fn into_parts(self) -> (Connection, NamedTempFile) {
        (self.connection, self.file)
    }
}

/// Whether the database file at `path` has no content yet.
pub fn is_empty_file(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len() == 0),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ProcessorError::MissingInput(path.to_path_buf()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Opens a database file in place without writing to it.
pub fn open_read_only(format: &'static str, path: &Path) -> Result<Connection> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    let read = file.read(&mut header)?;
    check_magic(format, &header[..read])?;
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

pub fn table_exists(connection: &Connection, table: &str) -> Result<bool> {
    let mut statement =
        connection.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(statement.exists([table])?)
}

/// Tables and columns present in a database, discovered at runtime so that
/// older and newer vendor schemas can be read by the same code.
#[derive(Debug, Default, Clone)]
pub struct Schema {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl Schema {
    pub fn introspect(connection: &Connection) -> Result<Self> {
        let mut statement =
            connection.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tables = BTreeMap::new();
        for name in names {
            let mut info = connection.prepare(&format!("PRAGMA table_info(\"{name}\")"))?;
            let columns = info
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<BTreeSet<_>>>()?;
            tables.insert(name, columns);
        }
        Ok(Self { tables })
    }

    /// Table lookup is case-insensitive, like SQLite's own.
    pub fn has_table(&self, table: &str) -> bool {
        self.columns(table).is_some()
    }

    fn columns(&self, table: &str) -> Option<&BTreeSet<String>> {
        self.tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, columns)| columns)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|columns| columns.iter().any(|known| known.eq_ignore_ascii_case(column)))
    }

    /// Comma-separated select list for `columns`. Columns the table lacks are
    /// selected as `NULL` so row indexes stay stable across schema versions.
    pub fn select_list(&self, table: &str, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|column| {
                if self.has_column(table, column) {
                    format!("\"{column}\"")
                } else {
                    format!("NULL AS \"{column}\"")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Replaces the value of every `(table, column)` cell that has a rule.
/// Rows are walked in id order so the result does not depend on the map.
pub fn translate_columns(
    connection: &mut Connection,
    columns: &[(&str, &str)],
    translations: &TranslationMap,
) -> Result<usize> {
    let schema = Schema::introspect(connection)?;
    let tx = connection.transaction()?;
    let mut updated = 0;
    for (table, column) in columns {
        if !schema.has_column(table, column) || !schema.has_column(table, "Id") {
            debug!(table, column, "column absent, skipping");
            continue;
        }
        let rows: Vec<(i64, String)> = {
            let mut statement = tx.prepare(&format!(
                "SELECT \"Id\", \"{column}\" FROM \"{table}\" WHERE \"{column}\" IS NOT NULL ORDER BY \"Id\""
            ))?;
            statement
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        };
        let mut update =
            tx.prepare(&format!("UPDATE \"{table}\" SET \"{column}\" = ?1 WHERE \"Id\" = ?2"))?;
        for (id, text) in rows {
            if let Some(replacement) = translations.lookup(&text) {
                if replacement != text {
                    update.execute(params![replacement, id])?;
                    updated += 1;
                }
            }
        }
    }
    tx.commit()?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_checked() {
        assert!(check_magic("snap", b"SQLite format 3\0rest").is_ok());
        let err = check_magic("snap", b"PK\x03\x04").expect_err("bad magic");
        assert!(matches!(err, ProcessorError::Load { format: "snap", .. }));
    }

    #[test]
    fn schema_reports_missing_columns_as_null() {
        let db = ScopedDatabase::create().expect("db");
        db.connection
            .execute_batch("CREATE TABLE Button (Id INTEGER PRIMARY KEY, Label TEXT);")
            .expect("schema");
        let schema = Schema::introspect(&db.connection).expect("introspect");
        assert!(schema.has_table("Button"));
        assert!(!schema.has_table("Page"));
        assert_eq!(
            schema.select_list("Button", &["Id", "Message"]),
            "\"Id\", NULL AS \"Message\""
        );

        let bytes = db.into_bytes().expect("bytes");
        assert!(check_magic("snap", &bytes).is_ok());
    }
}
