use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::{DEFAULT_SHEET, Row, Sheet, SpreadsheetClient, StorageClient};
use crate::error::StorageError;

const SPREADSHEET_SUFFIX: &str = ".sheets";
const SHEET_EXTENSION: &str = "json";

/// Files below a base directory.
///
/// Keys are relative paths holding pretty-printed JSON. A spreadsheet `name`
/// is the directory `name.sheets/` with one JSON array of rows per sheet;
/// sheets are listed in name order.
#[derive(Debug, Clone)]
pub struct LocalFileClient {
    base: PathBuf,
}

impl LocalFileClient {
    /// Use `base` (a leading `~` is expanded), creating it if needed.
    pub fn new(base: &str) -> Result<Self, StorageError> {
        let base = PathBuf::from(shellexpand::tilde(base).to_string());
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !is_plain {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base.join(relative))
    }

    fn spreadsheet_dir(&self, spreadsheet: &str) -> Result<PathBuf, StorageError> {
        self.path_for(&format!("{spreadsheet}{SPREADSHEET_SUFFIX}"))
    }

    fn existing_spreadsheet(&self, spreadsheet: &str) -> Result<PathBuf, StorageError> {
        let dir = self.spreadsheet_dir(spreadsheet)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(StorageError::NotFound(spreadsheet.to_string()))
        }
    }

    fn sheet_path(dir: &Path, sheet: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(sheet).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {
                Ok(dir.join(format!("{sheet}.{SHEET_EXTENSION}")))
            }
            _ => Err(StorageError::InvalidKey(sheet.to_string())),
        }
    }

    fn collect_files(&self, dir: &Path, keys: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_files(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(&self.base) {
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
        Ok(())
    }
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, data: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)?;
    debug!(path = %path.display(), "wrote file");
    Ok(())
}

impl StorageClient for LocalFileClient {
    fn read(&self, key: &str) -> Result<Value, StorageError> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, key: &str, data: &Value) -> Result<(), StorageError> {
        write_json(&self.path_for(key)?, data)
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_ok_and(|path| path.exists())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        self.collect_files(&self.base, &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

impl SpreadsheetClient for LocalFileClient {
    fn read_sheet(&self, spreadsheet: &str, sheet: Option<&str>) -> Result<Sheet, StorageError> {
        let dir = self.existing_spreadsheet(spreadsheet)?;
        let name = match sheet {
            Some(name) => name.to_string(),
            None => self
                .list_sheets(spreadsheet)?
                .into_iter()
                .next()
                .ok_or_else(|| StorageError::NotFound(format!("{spreadsheet}/<first sheet>")))?,
        };
        let path = Self::sheet_path(&dir, &name)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(format!("{spreadsheet}/{name}")));
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_sheet(
        &self,
        spreadsheet: &str,
        rows: &[Row],
        sheet: Option<&str>,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let dir = self.spreadsheet_dir(spreadsheet)?;
        let path = Self::sheet_path(&dir, sheet.unwrap_or(DEFAULT_SHEET))?;
        if overwrite && dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        write_json(&path, rows)
    }

    fn create_spreadsheet(&self, name: &str) -> Result<String, StorageError> {
        let dir = self.spreadsheet_dir(name)?;
        if dir.exists() {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        let empty: &[Row] = &[];
        write_json(&Self::sheet_path(&dir, DEFAULT_SHEET)?, empty)?;
        Ok(name.to_string())
    }

    fn list_sheets(&self, spreadsheet: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.existing_spreadsheet(spreadsheet)?;
        let mut sheets = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_sheet = path
                .extension()
                .is_some_and(|extension| extension == SHEET_EXTENSION);
            if !path.is_file() || !is_sheet {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                sheets.push(stem.to_string_lossy().into_owned());
            }
        }
        sheets.sort();
        Ok(sheets)
    }

    fn delete_sheet(&self, spreadsheet: &str, sheet: &str) -> Result<(), StorageError> {
        let sheets = self.list_sheets(spreadsheet)?;
        if !sheets.iter().any(|name| name == sheet) {
            return Err(StorageError::NotFound(format!("{spreadsheet}/{sheet}")));
        }
        if sheets.len() == 1 {
            return Err(StorageError::Unsupported(
                "cannot delete the last sheet of a spreadsheet".to_string(),
            ));
        }
        let dir = self.existing_spreadsheet(spreadsheet)?;
        fs::remove_file(Self::sheet_path(&dir, sheet)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn client() -> (TempDir, LocalFileClient) {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = LocalFileClient::new(&dir.path().to_string_lossy()).expect("client");
        (dir, client)
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_key_value_lifecycle() {
        let (_dir, client) = client();
        let data = json!({"code": "ABC123", "title": "Rust at scale"});

        client.write("pyconde/submissions.json", &data).expect("write");
        assert!(client.exists("pyconde/submissions.json"));
        assert_eq!(client.read("pyconde/submissions.json").expect("read"), data);

        client.delete("pyconde/submissions.json").expect("delete");
        assert!(!client.exists("pyconde/submissions.json"));
        assert!(matches!(
            client.read("pyconde/submissions.json"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            client.delete("pyconde/submissions.json"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_keys_must_stay_inside_base() {
        let (_dir, client) = client();
        for key in ["../escape.json", "/etc/passwd", ""] {
            assert!(
                matches!(client.write(key, &json!(1)), Err(StorageError::InvalidKey(_))),
                "{key} should be rejected"
            );
        }
        assert!(!client.exists("../escape.json"));
    }

    #[test]
    fn test_list_keys_filters_by_prefix() {
        let (_dir, client) = client();
        client.write("events.json", &json!([])).expect("write");
        client.write("pyconde/talks.json", &json!([])).expect("write");
        client.write("pyconde/rooms.json", &json!([])).expect("write");

        assert_eq!(
            client.list_keys("").expect("list"),
            vec!["events.json", "pyconde/rooms.json", "pyconde/talks.json"]
        );
        assert_eq!(
            client.list_keys("pyconde/").expect("list"),
            vec!["pyconde/rooms.json", "pyconde/talks.json"]
        );
    }

    #[test]
    fn test_spreadsheet_lifecycle() {
        let (_dir, client) = client();
        let id = client.create_spreadsheet("schedule").expect("create");
        assert_eq!(id, "schedule");
        assert_eq!(client.list_sheets(&id).expect("sheets"), vec![DEFAULT_SHEET]);
        assert!(client.read_sheet(&id, None).expect("first sheet").is_empty());

        let talks = vec![row(&[("code", json!("ABC123")), ("title", json!("Rust"))])];
        client
            .write_sheet(&id, &talks, Some("Talks"), false)
            .expect("add sheet");
        assert_eq!(
            client.list_sheets(&id).expect("sheets"),
            vec![DEFAULT_SHEET, "Talks"]
        );
        assert_eq!(client.read_sheet(&id, Some("Talks")).expect("read"), talks);

        let all = client.read_all_sheets(&id).expect("all sheets");
        assert_eq!(all.len(), 2);
        assert_eq!(all["Talks"], talks);

        client.delete_sheet(&id, DEFAULT_SHEET).expect("delete sheet");
        assert!(matches!(
            client.delete_sheet(&id, "Talks"),
            Err(StorageError::Unsupported(_))
        ));
        assert!(matches!(
            client.delete_sheet(&id, "Missing"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_overwrite_replaces_all_sheets() {
        let (_dir, client) = client();
        client.create_spreadsheet("scores").expect("create");
        client
            .write_sheet("scores", &[row(&[("a", json!(1))])], Some("Extra"), false)
            .expect("write");

        client
            .write_sheet("scores", &[row(&[("b", json!(2))])], None, true)
            .expect("overwrite");

        assert_eq!(client.list_sheets("scores").expect("sheets"), vec![DEFAULT_SHEET]);
        let rows = client.read_sheet("scores", None).expect("read");
        assert_eq!(rows[0]["b"], json!(2));
    }

    #[test]
    fn test_create_existing_spreadsheet_fails() {
        let (_dir, client) = client();
        client.create_spreadsheet("reviews").expect("create");
        assert!(matches!(
            client.create_spreadsheet("reviews"),
            Err(StorageError::AlreadyExists(_))
        ));
        assert!(matches!(
            client.list_sheets("unknown"),
            Err(StorageError::NotFound(_))
        ));
    }
}
