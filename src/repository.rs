//! Migration file discovery and up/down parsing.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::MigrateError;

/// Extension recognized as a migration script.
pub const MIGRATION_EXTENSION: &str = "sql";

/// A single migration script, rebuilt from disk on every run.
///
/// `name` is the file name and doubles as the ledger key; `down_sql` may be
/// empty when the file has no `-- down` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

/// Loads migration files from one directory, sorted byte-wise by name.
///
/// Name order is the only ordering mechanism, so files must be named so
/// that lexicographic order matches intended order (a leading timestamp).
#[derive(Debug, Clone)]
pub struct FileRepository {
    dir: PathBuf,
}

impl FileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read and parse every `.sql` file in the directory, ascending by name.
    ///
    /// Subdirectories and other extensions are skipped.
    pub fn load(&self) -> Result<Vec<MigrationFile>, MigrateError> {
        if !self.dir.is_dir() {
            return Err(MigrateError::DirectoryNotFound(self.dir.clone()));
        }

        let read_dir_err = |source| MigrateError::ReadDirectory {
            path: self.dir.clone(),
            source,
        };

        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(read_dir_err)? {
            let entry = entry.map_err(read_dir_err)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(MIGRATION_EXTENSION) {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut files = Vec::with_capacity(names.len());
        for name in names {
            let source = fs::read_to_string(self.dir.join(&name)).map_err(|source| {
                MigrateError::UnreadableFile {
                    name: name.clone(),
                    source,
                }
            })?;
            let (up_sql, down_sql) = split_up_down(&source);
            files.push(MigrationFile {
                name,
                up_sql,
                down_sql,
            });
        }
        Ok(files)
    }
}

/// Split a script into its up and down sections.
///
/// A line equal to `-- up` (trimmed, case-insensitive) starts the up
/// section and `-- down` the down section; content before the first marker
/// belongs to up. Marker lines are never part of either script, and both
/// sections are whitespace-trimmed at the end.
pub fn split_up_down(source: &str) -> (String, String) {
    let mut up = String::new();
    let mut down = String::new();
    let mut in_down = false;

    for line in source.lines() {
        match line.trim().to_ascii_lowercase().as_str() {
            "-- up" => {
                in_down = false;
                continue;
            }
            "-- down" => {
                in_down = true;
                continue;
            }
            _ => {}
        }
        let section = if in_down { &mut down } else { &mut up };
        section.push_str(line);
        section.push('\n');
    }

    (up.trim().to_string(), down.trim().to_string())
}
