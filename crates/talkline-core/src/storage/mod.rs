//! Destinations for exported data.
//!
//! The API client never writes anywhere by itself; callers hand its output to
//! one of these backends.

mod local;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::StorageSettings;
use crate::error::StorageError;

pub use local::LocalFileClient;

/// One row of a sheet, keyed by column name.
pub type Row = BTreeMap<String, Value>;
pub type Sheet = Vec<Row>;

pub const DEFAULT_SHEET: &str = "Sheet1";

/// Key-value storage of JSON documents.
pub trait StorageClient {
    fn read(&self, key: &str) -> Result<Value, StorageError>;
    fn write(&self, key: &str, data: &Value) -> Result<(), StorageError>;
    fn exists(&self, key: &str) -> bool;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Keys starting with `prefix`, sorted.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Tabular storage with named sheets.
pub trait SpreadsheetClient {
    /// `None` reads the first sheet.
    fn read_sheet(&self, spreadsheet: &str, sheet: Option<&str>) -> Result<Sheet, StorageError>;

    /// With `overwrite`, the spreadsheet afterwards holds only this sheet;
    /// otherwise the sheet is added or replaced next to the existing ones.
    fn write_sheet(
        &self,
        spreadsheet: &str,
        rows: &[Row],
        sheet: Option<&str>,
        overwrite: bool,
    ) -> Result<(), StorageError>;

    /// Create an empty spreadsheet and return its id.
    fn create_spreadsheet(&self, name: &str) -> Result<String, StorageError>;
    fn list_sheets(&self, spreadsheet: &str) -> Result<Vec<String>, StorageError>;
    fn delete_sheet(&self, spreadsheet: &str, sheet: &str) -> Result<(), StorageError>;

    fn read_all_sheets(&self, spreadsheet: &str) -> Result<BTreeMap<String, Sheet>, StorageError> {
        self.list_sheets(spreadsheet)?
            .into_iter()
            .map(|name| {
                let rows = self.read_sheet(spreadsheet, Some(&name))?;
                Ok((name, rows))
            })
            .collect()
    }
}

/// A backend offering both kinds of storage.
pub trait Storage: StorageClient + SpreadsheetClient {}

impl<T: StorageClient + SpreadsheetClient> Storage for T {}

/// Build the backend named in the settings.
pub fn storage_client(settings: &StorageSettings) -> Result<Box<dyn Storage>, StorageError> {
    match settings.provider.trim().to_ascii_lowercase().as_str() {
        "local" => Ok(Box::new(LocalFileClient::new(&settings.local_path)?)),
        other => Err(StorageError::UnsupportedProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_client_local() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StorageSettings {
            provider: "Local".to_string(),
            local_path: dir.path().to_string_lossy().into_owned(),
        };
        let storage = storage_client(&settings).expect("local backend");
        storage
            .write("smoke.json", &serde_json::json!({"ok": true}))
            .expect("write");
        assert!(storage.exists("smoke.json"));
    }

    #[test]
    fn test_storage_client_rejects_unknown_provider() {
        let settings = StorageSettings {
            provider: "google".to_string(),
            local_path: ".".to_string(),
        };
        match storage_client(&settings) {
            Err(StorageError::UnsupportedProvider(name)) => assert_eq!(name, "google"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("google storage is not built in"),
        }
    }
}
