//! Saved connection strings, persisted as `key|value` lines.

use crate::error::{AppError, AppResult};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DELIMITER: char = '|';

/// Marks a connection argument that names a saved connection.
pub const SAVED_CONNECTION_PREFIX: &str = "cfg|";

pub const CONFIG_EMPTY: &str = "config file is empty";
pub const NO_CHANGES: &str = "no changes to save";

/// Key/value store for connection strings.
///
/// Changes are staged in memory and written by [`ConfigStore::save`].
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    updated: bool,
}

impl ConfigStore {
    /// Reads the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => parse_entries(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No saved connections at {}", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(AppError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            path,
            entries,
            updated: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// `key=value` lines sorted by key.
    pub fn list(&self) -> String {
        if self.entries.is_empty() {
            return CONFIG_EMPTY.to_string();
        }
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn update(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        self.updated = true;
    }

    /// Stages removal of `key`. Removing an unknown key changes nothing.
    pub fn remove(&mut self, key: &str) -> AppResult<()> {
        if self.entries.is_empty() {
            return Err(AppError::Config(CONFIG_EMPTY.to_string()));
        }
        if self.entries.remove(key).is_some() {
            self.updated = true;
        }
        Ok(())
    }

    /// Writes staged changes, creating the parent directory when needed.
    pub fn save(&mut self) -> AppResult<()> {
        if !self.updated {
            return Err(AppError::Config(NO_CHANGES.to_string()));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut content = String::new();
        for (key, value) in &self.entries {
            content.push_str(key);
            content.push(DELIMITER);
            content.push_str(value);
            content.push('\n');
        }
        std::fs::write(&self.path, content)
            .map_err(|e| AppError::Config(format!("error saving config: {e}")))?;

        self.updated = false;
        Ok(())
    }

    /// Resolves `cfg|NAME` through the store; anything else is returned as a
    /// literal connection string.
    pub fn resolve_connection(&self, argument: &str) -> AppResult<String> {
        let Some(name) = argument.strip_prefix(SAVED_CONNECTION_PREFIX) else {
            return Ok(argument.to_string());
        };
        self.get(name).map(str::to_string).ok_or_else(|| {
            AppError::InvalidArgument(format!("no saved connection named '{name}'"))
        })
    }
}

fn parse_entries(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        // Values are connection strings and may contain the delimiter.
        match line.split_once(DELIMITER) {
            Some((key, value)) => {
                entries.insert(key.to_string(), value.to_string());
            }
            None => log::warn!("Skipping config line {} without a delimiter", number + 1),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = assert_ok!(ConfigStore::load(dir.path().join("connections")));
        assert_eq!(store.list(), CONFIG_EMPTY);
    }

    #[test]
    fn test_parse_skips_malformed_lines_and_splits_once() {
        let entries = parse_entries("prod|Endpoint=sb://a/;Key=x|y\r\nbroken\n\ndev|Endpoint=sb://b/\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["prod"], "Endpoint=sb://a/;Key=x|y");
        assert_eq!(entries["dev"], "Endpoint=sb://b/");
    }

    #[test]
    fn test_update_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("connections");

        let mut store = assert_ok!(ConfigStore::load(&path));
        store.update("zeta", "Endpoint=sb://z/");
        store.update("alpha", "Endpoint=sb://a/");
        assert_ok!(store.save());

        let reloaded = assert_ok!(ConfigStore::load(&path));
        assert_eq!(
            reloaded.list(),
            "alpha=Endpoint=sb://a/\nzeta=Endpoint=sb://z/"
        );
    }

    #[test]
    fn test_save_without_changes_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = assert_ok!(ConfigStore::load(dir.path().join("connections")));
        let err = assert_err!(store.save());
        assert_eq!(err.to_string(), NO_CHANGES);
    }

    #[test]
    fn test_remove_from_empty_store_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = assert_ok!(ConfigStore::load(dir.path().join("connections")));
        let err = assert_err!(store.remove("prod"));
        assert_eq!(err.to_string(), CONFIG_EMPTY);
    }

    #[test]
    fn test_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections");
        std::fs::write(&path, "prod|a\ndev|b\n").unwrap();

        let mut store = assert_ok!(ConfigStore::load(&path));
        assert_ok!(store.remove("prod"));
        assert_ok!(store.save());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "dev|b\n");
    }

    #[test]
    fn test_resolve_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections");
        std::fs::write(&path, "prod|Endpoint=sb://prod/\n").unwrap();
        let store = assert_ok!(ConfigStore::load(&path));

        assert_eq!(
            store.resolve_connection("cfg|prod").unwrap(),
            "Endpoint=sb://prod/"
        );
        assert_eq!(
            store.resolve_connection("Endpoint=sb://literal/").unwrap(),
            "Endpoint=sb://literal/"
        );
        assert!(matches!(
            store.resolve_connection("cfg|missing"),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
