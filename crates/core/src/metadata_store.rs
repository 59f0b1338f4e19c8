use crate::error::StoreError;
use crate::models::{ExtractedDocument, MetadataRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Writes `records` as pretty-printed UTF-8 JSON, creating parent directories.
///
/// The file is written in place; a crash mid-write leaves it truncated.
pub fn save_records<T: Serialize>(records: &[T], path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut payload = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    payload.push(b'\n');

    fs::write(path, payload).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let bytes = fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            StoreError::NotFound(path.to_path_buf())
        } else {
            StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_metadata(records: &[MetadataRecord], path: &Path) -> Result<(), StoreError> {
    save_records(records, path)
}

pub fn load_metadata(path: &Path) -> Result<Vec<MetadataRecord>, StoreError> {
    load_records(path)
}

pub fn save_extracted(documents: &[ExtractedDocument], path: &Path) -> Result<(), StoreError> {
    save_records(documents, path)
}

pub fn load_extracted(path: &Path) -> Result<Vec<ExtractedDocument>, StoreError> {
    load_records(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn metadata_round_trip_keeps_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/models/metadata.json");
        let records = vec![
            MetadataRecord {
                id: 0,
                file: "scans/b.png".to_string(),
                text: "second page first".to_string(),
            },
            MetadataRecord {
                id: 1,
                file: "scans/a.png".to_string(),
                text: "Grüße aus Köln".to_string(),
            },
        ];

        save_metadata(&records, &path)?;
        let loaded = load_metadata(&path)?;

        assert_eq!(loaded, records);
        Ok(())
    }

    #[test]
    fn flat_string_maps_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("records.json");
        let records: Vec<BTreeMap<String, String>> = vec![
            BTreeMap::from([("file".to_string(), "x.pdf".to_string())]),
            BTreeMap::new(),
            BTreeMap::from([
                ("file".to_string(), "y.jpg".to_string()),
                ("text".to_string(), "note".to_string()),
            ]),
        ];

        save_records(&records, &path)?;
        let loaded: Vec<BTreeMap<String, String>> = load_records(&path)?;

        assert_eq!(loaded, records);
        Ok(())
    }

    #[test]
    fn output_is_indented_and_keeps_non_ascii() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("extracted.json");
        let documents = vec![ExtractedDocument {
            file: "notes/日本.png".to_string(),
            text: "こんにちは".to_string(),
        }];

        save_extracted(&documents, &path)?;
        let raw = std::fs::read_to_string(&path)?;

        assert!(raw.contains("こんにちは"));
        assert!(raw.contains("\n  {\n    \"file\""));
        Ok(())
    }

    #[test]
    fn missing_file_is_not_found() {
        let result = load_metadata(Path::new("/definitely/not/here/metadata.json"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn malformed_file_is_json_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("metadata.json");
        std::fs::write(&path, b"[{\"id\": 0,")?;

        let result = load_metadata(&path);
        assert!(matches!(result, Err(StoreError::Json { .. })));
        Ok(())
    }

    #[test]
    fn extracted_documents_default_missing_fields() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("extracted.json");
        std::fs::write(&path, br#"[{"file": "a.png"}, {"text": "orphan"}]"#)?;

        let loaded = load_extracted(&path)?;
        assert_eq!(loaded[0].text, "");
        assert_eq!(loaded[1].file, "");
        assert_eq!(loaded[1].text, "orphan");
        Ok(())
    }
}
