use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker::TextSplitter;
use crate::config::Settings;
use crate::embedding::Embedder;
use crate::error::{QaError, Result};
use crate::index::VectorIndex;
use crate::loader::{self, clean_source};
use crate::models::SourceDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Idle,
    Loading,
    Chunking,
    Indexing,
    Done,
    Failed,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Idle => "idle",
            IngestStage::Loading => "loading",
            IngestStage::Chunking => "chunking",
            IngestStage::Indexing => "indexing",
            IngestStage::Done => "done",
            IngestStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How one file's ingestion ended.
#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    pub stage: IngestStage,
    /// Stage that was running when the file failed.
    pub failed_during: Option<IngestStage>,
    pub chunks: usize,
    pub error: Option<QaError>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.stage == IngestStage::Done
    }

    pub fn into_result(self) -> Result<usize> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.chunks),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Tracks one file through the ingestion stages.
struct IngestRun {
    filename: String,
    stage: IngestStage,
}

impl IngestRun {
    fn new(filename: String) -> Self {
        Self {
            filename,
            stage: IngestStage::Idle,
        }
    }

    fn advance(&mut self, next: IngestStage) {
        debug!("{}: {} -> {}", self.filename, self.stage, next);
        self.stage = next;
    }

    fn finish(self, result: Result<usize>) -> FileOutcome {
        match result {
            Ok(chunks) => {
                info!("Vectorization complete: {}, chunks: {}", self.filename, chunks);
                FileOutcome {
                    filename: self.filename,
                    stage: IngestStage::Done,
                    failed_during: None,
                    chunks,
                    error: None,
                }
            }
            Err(err) => {
                warn!("Failed to ingest {} during {}: {}", self.filename, self.stage, err);
                FileOutcome {
                    filename: self.filename,
                    stage: IngestStage::Failed,
                    failed_during: Some(self.stage),
                    chunks: 0,
                    error: Some(err),
                }
            }
        }
    }
}

/// Runs load → chunk → index for uploads and for full rebuilds.
pub struct IngestionWorkflow {
    source_dir: PathBuf,
    index_dir: PathBuf,
    splitter: TextSplitter,
    embedder: Arc<dyn Embedder>,
}

impl IngestionWorkflow {
    pub fn new(settings: &Settings, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            source_dir: settings.source_dir.clone(),
            index_dir: settings.index_dir.clone(),
            splitter: TextSplitter::new(settings.chunk_size, settings.chunk_overlap),
            embedder,
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Writes an upload into the source directory under its cleaned name.
    pub fn save_upload(&self, upload: &SourceDocument) -> Result<PathBuf> {
        let filename = clean_source(&upload.filename);
        loader::ensure_supported(Path::new(&filename))?;

        fs::create_dir_all(&self.source_dir)?;
        let path = self.source_dir.join(&filename);
        fs::write(&path, &upload.bytes)?;
        debug!("Saved upload {} ({} bytes)", path.display(), upload.bytes.len());
        Ok(path)
    }

    /// Ingests one file, appending to the existing index or creating it.
    pub async fn ingest_file(&self, path: &Path) -> Result<usize> {
        self.run_file(path).await.into_result()
    }

    async fn run_file(&self, path: &Path) -> FileOutcome {
        let mut run = IngestRun::new(clean_source(&path.to_string_lossy()));
        let result = self.process_file(path, &mut run).await;
        run.finish(result)
    }

    async fn process_file(&self, path: &Path, run: &mut IngestRun) -> Result<usize> {
        run.advance(IngestStage::Loading);
        let documents = loader::load(path)?;

        run.advance(IngestStage::Chunking);
        let chunks = self.splitter.split_documents(&documents);
        if chunks.is_empty() {
            return Err(QaError::EmptyInput);
        }
        let count = chunks.len();

        run.advance(IngestStage::Indexing);
        let index = if VectorIndex::exists(&self.index_dir) {
            let mut index = VectorIndex::load(&self.index_dir, self.embedder.as_ref())?;
            index.append(chunks, self.embedder.as_ref()).await?;
            index
        } else {
            info!("No knowledge base yet, creating one at {}", self.index_dir.display());
            VectorIndex::create(chunks, self.embedder.as_ref()).await?
        };
        index.save(&self.index_dir)?;

        run.advance(IngestStage::Done);
        Ok(count)
    }

    /// Saves and ingests each upload on its own; a failure never stops the
    /// remaining files.
    pub async fn ingest_uploads(&self, uploads: Vec<SourceDocument>) -> BatchReport {
        let total = uploads.len();
        let mut report = BatchReport::default();

        for (i, upload) in uploads.into_iter().enumerate() {
            info!("Processing: {} ({}/{})", upload.filename, i + 1, total);
            let outcome = match self.save_upload(&upload) {
                Ok(path) => self.run_file(&path).await,
                Err(err) => {
                    let mut run = IngestRun::new(clean_source(&upload.filename));
                    run.advance(IngestStage::Loading);
                    run.finish(Err(err))
                }
            };
            report.outcomes.push(outcome);
        }

        info!("{} of {} files ingested", report.succeeded(), total);
        report
    }

    /// Rebuilds the index from every supported file in the source directory,
    /// replacing the previous index. Nothing is written when no text is found.
    pub async fn ingest_all(&self) -> Result<usize> {
        info!("Scanning folder: {}", self.source_dir.display());
        let mut documents = Vec::new();

        for path in supported_files(&self.source_dir)? {
            match loader::load(&path) {
                Ok(docs) => documents.extend(docs),
                Err(err) => warn!("Skipping {}: {}", path.display(), err),
            }
        }
        if documents.is_empty() {
            warn!("No processable documents found in {}", self.source_dir.display());
            return Err(QaError::EmptyInput);
        }

        let chunks = self.splitter.split_documents(&documents);
        let count = chunks.len();
        let index = VectorIndex::create(chunks, self.embedder.as_ref()).await?;
        index.save(&self.index_dir)?;

        info!("Vectorization complete, {} chunks from {} documents", count, documents.len());
        Ok(count)
    }

    /// First-run bootstrap: builds the index from the source directory when
    /// none exists. Returns whether an index was built.
    pub async fn ensure_knowledge_base(&self) -> Result<bool> {
        if VectorIndex::exists(&self.index_dir) {
            return Ok(false);
        }
        info!("Creating knowledge base, this may take some time");
        match self.ingest_all().await {
            Ok(_) => Ok(true),
            Err(QaError::EmptyInput) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn list_documents(&self) -> Result<Vec<String>> {
        list_documents(&self.source_dir)
    }
}

/// Filenames currently in the source directory, sorted.
pub fn list_documents(source_dir: &Path) -> Result<Vec<String>> {
    if !source_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(source_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn supported_files(source_dir: &Path) -> Result<Vec<PathBuf>> {
    if !source_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(source_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if loader::is_supported(entry.path()) {
            files.push(entry.into_path());
        } else {
            debug!("Skipping unsupported file: {}", entry.path().display());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::{FailingEmbedder, HashEmbedder};
    use crate::error::ProviderError;
    use crate::loader::testing::{docx_bytes, pdf_without_fonts, pdf_without_pages};
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        workflow: IngestionWorkflow,
        embedder: Arc<HashEmbedder>,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let root = TempDir::new()?;
        let settings = Settings {
            source_dir: root.path().join("source_documents"),
            index_dir: root.path().join("vectorstore"),
            chunk_size: 80,
            chunk_overlap: 10,
            ..Settings::default()
        };
        let embedder = Arc::new(HashEmbedder::new());
        let workflow = IngestionWorkflow::new(&settings, embedder.clone());
        Ok(Fixture {
            _root: root,
            workflow,
            embedder,
        })
    }

    fn load_index(fx: &Fixture) -> anyhow::Result<VectorIndex> {
        Ok(VectorIndex::load(fx.workflow.index_dir(), fx.embedder.as_ref())?)
    }

    const FILE_A: &str = "Pump warranty lasts two years from the date of purchase.\n\n\
        Warranty service requires the original receipt and serial number.";
    const FILE_B: &str = "The office cafeteria opens at eight in the morning.";

    #[tokio::test]
    async fn test_ingest_file_creates_then_appends() -> anyhow::Result<()> {
        let fx = fixture()?;

        let a = fx.workflow.save_upload(&SourceDocument::new("a.txt", FILE_A))?;
        let n = fx.workflow.ingest_file(&a).await?;
        assert!(n >= 2);
        assert!(VectorIndex::exists(fx.workflow.index_dir()));
        assert_eq!(load_index(&fx)?.len(), n);

        let b = fx.workflow.save_upload(&SourceDocument::new("b.txt", FILE_B))?;
        let m = fx.workflow.ingest_file(&b).await?;
        let index = load_index(&fx)?;
        assert_eq!(index.len(), n + m);

        let hits = index
            .query("pump warranty two years", 1, fx.embedder.as_ref())
            .await?;
        assert_eq!(hits[0].source(), "a.txt");
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_file_leaves_index_unchanged() -> anyhow::Result<()> {
        let fx = fixture()?;
        let a = fx.workflow.save_upload(&SourceDocument::new("a.txt", FILE_A))?;
        fx.workflow.ingest_file(&a).await?;
        let before = fs::read(VectorIndex::marker_path(fx.workflow.index_dir()))?;

        let csv = fx.workflow.source_dir().join("report.csv");
        fs::write(&csv, "a,b\n1,2")?;
        let result = fx.workflow.ingest_file(&csv).await;
        assert!(matches!(result, Err(QaError::UnsupportedFormat(_))));

        let after = fs::read(VectorIndex::marker_path(fx.workflow.index_dir()))?;
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_without_writing() -> anyhow::Result<()> {
        let fx = fixture()?;
        let result = fx.workflow.save_upload(&SourceDocument::new("report.csv", "x,y"));
        assert!(matches!(result, Err(QaError::UnsupportedFormat(_))));
        assert!(!fx.workflow.source_dir().join("report.csv").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_strips_path_components() -> anyhow::Result<()> {
        let fx = fixture()?;
        let path = fx
            .workflow
            .save_upload(&SourceDocument::new("../../etc/notes.txt", "hello"))?;
        assert_eq!(path, fx.workflow.source_dir().join("notes.txt"));
        assert_eq!(fx.workflow.list_documents()?, vec!["notes.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_failures_are_isolated() -> anyhow::Result<()> {
        let fx = fixture()?;
        let uploads = vec![
            SourceDocument::new("a.txt", FILE_A),
            SourceDocument::new("report.csv", "a,b"),
            SourceDocument::new("blank.txt", "   "),
            SourceDocument::new("broken.docx", "not a zip"),
            SourceDocument::new("handbook.docx", docx_bytes(&[FILE_B])),
        ];

        let report = fx.workflow.ingest_uploads(uploads).await;
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 3);

        let csv = &report.outcomes[1];
        assert_eq!(csv.stage, IngestStage::Failed);
        assert_eq!(csv.failed_during, Some(IngestStage::Loading));
        assert!(matches!(csv.error, Some(QaError::UnsupportedFormat(_))));

        let blank = &report.outcomes[2];
        assert_eq!(blank.failed_during, Some(IngestStage::Chunking));
        assert!(matches!(blank.error, Some(QaError::EmptyInput)));

        assert!(matches!(report.outcomes[3].error, Some(QaError::DocxExtraction(_))));

        let index = load_index(&fx)?;
        assert_eq!(index.sources(), vec!["a.txt", "handbook.docx"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_pdf_does_not_stop_batch() -> anyhow::Result<()> {
        let fx = fixture()?;
        let uploads = vec![
            SourceDocument::new("scan.pdf", pdf_without_fonts()),
            SourceDocument::new("a.txt", FILE_A),
        ];

        let report = fx.workflow.ingest_uploads(uploads).await;
        assert_eq!(report.succeeded(), 1);

        let scan = &report.outcomes[0];
        assert_eq!(scan.failed_during, Some(IngestStage::Loading));
        assert!(matches!(scan.error, Some(QaError::PdfExtraction(_))));
        assert!(report.outcomes[1].is_success());

        assert_eq!(load_index(&fx)?.sources(), vec!["a.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_pdf_without_pages_fails_at_chunking() -> anyhow::Result<()> {
        let fx = fixture()?;
        let report = fx
            .workflow
            .ingest_uploads(vec![SourceDocument::new("empty.pdf", pdf_without_pages())])
            .await;

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.failed_during, Some(IngestStage::Chunking));
        assert!(matches!(outcome.error, Some(QaError::EmptyInput)));
        assert!(!VectorIndex::exists(fx.workflow.index_dir()));
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported_at_indexing() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = Settings {
            source_dir: root.path().join("src"),
            index_dir: root.path().join("idx"),
            ..Settings::default()
        };
        let workflow = IngestionWorkflow::new(
            &settings,
            Arc::new(FailingEmbedder(ProviderError::Authentication("bad key".into()))),
        );

        let report = workflow
            .ingest_uploads(vec![SourceDocument::new("a.txt", FILE_A)])
            .await;
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.failed_during, Some(IngestStage::Indexing));
        assert!(matches!(
            outcome.error,
            Some(QaError::Provider(ProviderError::Authentication(_)))
        ));
        assert!(!VectorIndex::exists(&settings.index_dir));
        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_all_on_empty_directory() -> anyhow::Result<()> {
        let fx = fixture()?;
        fs::create_dir_all(fx.workflow.source_dir())?;

        let result = fx.workflow.ingest_all().await;
        assert!(matches!(result, Err(QaError::EmptyInput)));
        assert!(!VectorIndex::exists(fx.workflow.index_dir()));
        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_all_empty_directory_keeps_previous_index() -> anyhow::Result<()> {
        let fx = fixture()?;
        let a = fx.workflow.save_upload(&SourceDocument::new("a.txt", FILE_A))?;
        fx.workflow.ingest_file(&a).await?;
        let before = fs::read(VectorIndex::marker_path(fx.workflow.index_dir()))?;
        fs::remove_file(&a)?;

        assert!(matches!(fx.workflow.ingest_all().await, Err(QaError::EmptyInput)));
        let after = fs::read(VectorIndex::marker_path(fx.workflow.index_dir()))?;
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_all_rebuilds_from_supported_files() -> anyhow::Result<()> {
        let fx = fixture()?;
        let a = fx.workflow.save_upload(&SourceDocument::new("a.txt", FILE_A))?;
        fx.workflow.ingest_file(&a).await?;
        fx.workflow.ingest_file(&a).await?;
        let doubled = load_index(&fx)?.len();

        fx.workflow.save_upload(&SourceDocument::new("b.txt", FILE_B))?;
        fs::write(fx.workflow.source_dir().join("notes.csv"), "skip,me")?;
        fs::create_dir_all(fx.workflow.source_dir().join("nested"))?;
        fs::write(fx.workflow.source_dir().join("nested/c.txt"), "ignored")?;

        let count = fx.workflow.ingest_all().await?;
        let index = load_index(&fx)?;
        assert_eq!(index.len(), count);
        assert_eq!(count, doubled / 2 + 1);
        assert_eq!(index.sources(), vec!["a.txt", "b.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_knowledge_base_bootstraps_once() -> anyhow::Result<()> {
        let fx = fixture()?;
        assert!(!fx.workflow.ensure_knowledge_base().await?);

        fs::create_dir_all(fx.workflow.source_dir())?;
        fs::write(fx.workflow.source_dir().join("a.txt"), FILE_A)?;
        assert!(fx.workflow.ensure_knowledge_base().await?);
        assert!(!fx.workflow.ensure_knowledge_base().await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_bootstrap_skips_unreadable_pdf() -> anyhow::Result<()> {
        let fx = fixture()?;
        fs::create_dir_all(fx.workflow.source_dir())?;
        fs::write(fx.workflow.source_dir().join("scan.pdf"), pdf_without_fonts())?;
        fs::write(fx.workflow.source_dir().join("a.txt"), FILE_A)?;

        assert!(fx.workflow.ensure_knowledge_base().await?);
        assert_eq!(load_index(&fx)?.sources(), vec!["a.txt"]);
        Ok(())
    }

    #[test]
    fn test_list_documents_missing_dir() -> anyhow::Result<()> {
        let fx = fixture()?;
        assert!(fx.workflow.list_documents()?.is_empty());
        Ok(())
    }
}
