use crate::cleaner::clean;
use crate::error::IngestError;
use crate::metadata_store::save_extracted;
use crate::models::ExtractedDocument;
use crate::ocr::OcrEngine;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "tiff", "pdf"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Supported files directly under `folder`, sorted by path.
pub fn discover_documents(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "input directory does not exist: {}",
            folder.display()
        )));
    }

    let mut files = Vec::new();

    for item in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match item {
            Ok(entry) => entry,
            Err(error) if is_dangling_symlink(&error) => {
                warn!(path = ?error.path(), "skipping dangling symlink");
                continue;
            }
            Err(error) => return Err(IngestError::Io(io::Error::from(error))),
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if is_supported(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

fn is_dangling_symlink(error: &walkdir::Error) -> bool {
    let missing_target = error
        .io_error()
        .is_some_and(|source| source.kind() == io::ErrorKind::NotFound);
    let is_link = error
        .path()
        .and_then(|path| path.symlink_metadata().ok())
        .is_some_and(|meta| meta.file_type().is_symlink());
    missing_target && is_link
}

pub async fn extract_document<O>(ocr: &O, path: &Path) -> Result<ExtractedDocument, IngestError>
where
    O: OcrEngine + ?Sized,
{
    let bytes = tokio::fs::read(path).await?;
    let lines = ocr.detect_lines(&bytes).await?;

    Ok(ExtractedDocument {
        file: path.to_string_lossy().to_string(),
        text: clean(&lines.join("\n")),
    })
}

/// OCRs every supported file and writes the results to `output`.
///
/// The first failing file aborts the batch and nothing is written.
pub async fn extract_folder<O>(
    ocr: &O,
    folder: &Path,
    output: &Path,
) -> Result<Vec<ExtractedDocument>, IngestError>
where
    O: OcrEngine + ?Sized,
{
    let files = discover_documents(folder)?;
    let mut documents = Vec::with_capacity(files.len());

    for path in files {
        info!(file = %path.display(), "processing");
        documents.push(extract_document(ocr, &path).await?);
    }

    save_extracted(&documents, output)?;
    info!(output = %output.display(), documents = documents.len(), "saved extracted text");
    Ok(documents)
}

#[derive(Debug)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub documents: Vec<ExtractedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

/// Like [`extract_folder`], but a failing file is recorded and skipped.
pub async fn extract_folder_best_effort<O>(
    ocr: &O,
    folder: &Path,
    output: &Path,
) -> Result<ExtractionReport, IngestError>
where
    O: OcrEngine + ?Sized,
{
    let files = discover_documents(folder)?;
    let mut report = ExtractionReport::default();

    for path in files {
        info!(file = %path.display(), "processing");
        match extract_document(ocr, &path).await {
            Ok(document) => report.documents.push(document),
            Err(error) => {
                warn!(file = %path.display(), %error, "skipping document");
                report.skipped.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    save_extracted(&report.documents, output)?;
    info!(
        output = %output.display(),
        documents = report.documents.len(),
        skipped = report.skipped.len(),
        "saved extracted text"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::load_extracted;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    /// Returns canned lines keyed by file content.
    #[derive(Default)]
    struct FakeOcr {
        pages: HashMap<Vec<u8>, Vec<String>>,
    }

    impl FakeOcr {
        fn with(mut self, content: &[u8], lines: &[&str]) -> Self {
            self.pages.insert(
                content.to_vec(),
                lines.iter().map(|line| line.to_string()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn detect_lines(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError> {
            self.pages
                .get(bytes)
                .cloned()
                .ok_or_else(|| IngestError::OcrFailed("unrecognised document".to_string()))
        }
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(is_supported(Path::new("scan.PNG")));
        assert!(is_supported(Path::new("scan.Jpeg")));
        assert!(is_supported(Path::new("dir/scan.tiff")));
        assert!(!is_supported(Path::new("scan.tif")));
        assert!(!is_supported(Path::new("notes.txt")));
        assert!(!is_supported(Path::new("pdf")));
    }

    #[test]
    fn discovery_skips_directories_and_nested_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("inner.pdf");
        fs::create_dir(&nested)?;
        fs::write(nested.join("deep.pdf"), b"deep")?;
        fs::write(dir.path().join("b.jpg"), b"b")?;
        fs::write(dir.path().join("a.PDF"), b"a")?;
        fs::write(dir.path().join("readme.md"), b"r")?;

        let files = discover_documents(dir.path())?;
        let names = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["a.PDF", "b.jpg"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlinks_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("kept.png"), b"kept")?;
        std::os::unix::fs::symlink(dir.path().join("gone.png"), dir.path().join("link.png"))?;

        let files = discover_documents(dir.path())?;

        assert_eq!(files, vec![dir.path().join("kept.png")]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_input_directory_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let locked = dir.path().join("locked");
        fs::create_dir(&locked)?;
        fs::write(locked.join("scan.png"), b"scan")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        let readable = fs::read_dir(&locked).is_ok();
        let result = discover_documents(&locked);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        // root ignores directory permissions
        if readable {
            return Ok(());
        }
        assert!(matches!(result, Err(IngestError::Io(_))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_fails_extraction() {
        let result = extract_document(&FakeOcr::default(), Path::new("/no/such/scan.png")).await;
        assert!(matches!(result, Err(IngestError::Io(_))));
    }

    #[test]
    fn missing_input_directory_is_invalid_argument() {
        let result = discover_documents(Path::new("/no/such/scans"));
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn unsupported_files_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let input = dir.path().join("sample_data");
        fs::create_dir(&input)?;
        fs::write(input.join("note.png"), b"png-bytes")?;
        fs::write(input.join("todo.txt"), b"plain text")?;
        let output = dir.path().join("models/extracted.json");

        let ocr = FakeOcr::default().with(b"png-bytes", &["Call mum", "  at   noon "]);
        let documents = extract_folder(&ocr, &input, &output).await?;

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "Call mum at noon");
        assert!(documents[0].file.ends_with("note.png"));
        assert_eq!(load_extracted(&output)?, documents);
        Ok(())
    }

    #[tokio::test]
    async fn empty_ocr_output_is_kept_as_empty_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("blank.jpg"), b"blank")?;
        let output = dir.path().join("out.json");

        let ocr = FakeOcr::default().with(b"blank", &[]);
        let documents = extract_folder(&ocr, dir.path(), &output).await?;

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "");
        Ok(())
    }

    #[tokio::test]
    async fn ocr_failure_aborts_batch_without_output() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let input = dir.path().join("scans");
        fs::create_dir(&input)?;
        fs::write(input.join("a.png"), b"known")?;
        fs::write(input.join("b.png"), b"unknown")?;
        let output = dir.path().join("extracted.json");

        let ocr = FakeOcr::default().with(b"known", &["fine"]);
        let result = extract_folder(&ocr, &input, &output).await;

        assert!(matches!(result, Err(IngestError::OcrFailed(_))));
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test]
    async fn best_effort_records_failures_and_writes_rest() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let input = dir.path().join("scans");
        fs::create_dir(&input)?;
        fs::write(input.join("a.png"), b"known")?;
        fs::write(input.join("b.png"), b"unknown")?;
        let output = dir.path().join("extracted.json");

        let ocr = FakeOcr::default().with(b"known", &["fine"]);
        let report = extract_folder_best_effort(&ocr, &input, &output).await?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            report.skipped[0].path.file_name().and_then(|name| name.to_str()),
            Some("b.png")
        );
        assert_eq!(load_extracted(&output)?.len(), 1);
        Ok(())
    }
}
