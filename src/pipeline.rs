// src/pipeline.rs

//! Drives each uploaded file through OCR, the model, parsing and flattening,
//! and collects a render model for the presentation layer.

use crate::chart::{self, PieSlice};
use crate::error::{ExtractError, FileError, OcrError};
use crate::invoice::{AggregationMode, CategoryTotals, InvoiceRecord, InvoiceRow, InvoiceTable};
use crate::llm_extract::LlmClient;
use crate::ocr_client::{self, OcrClient};
use crate::response_parser;
use async_trait::async_trait;
use serde::Serialize;
use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

/// Image types accepted for upload.
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_accepted(filename: &str) -> bool {
    ocr_client::extension(filename).is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Where an upload's bytes live.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub source: UploadSource,
}

impl Upload {
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            source: UploadSource::Bytes(bytes),
        }
    }

    pub fn from_path(path: PathBuf) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            filename,
            source: UploadSource::Path(path),
        }
    }

    /// The upload's bytes, read from disk for path uploads.
    pub async fn read(&self) -> io::Result<Cow<'_, [u8]>> {
        match &self.source {
            UploadSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            UploadSource::Path(path) => tokio::fs::read(path).await.map(Cow::Owned),
        }
    }
}

/// Turns an image into text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, filename: &str, image: &[u8]) -> Result<String, OcrError>;
}

/// Turns OCR text into the model's raw reply.
#[async_trait]
pub trait InvoiceModel: Send + Sync {
    async fn complete(&self, ocr_text: &str) -> Result<String, ExtractError>;
}

#[async_trait]
impl TextRecognizer for OcrClient {
    async fn recognize(&self, filename: &str, image: &[u8]) -> Result<String, OcrError> {
        self.recognize_upload(filename, image).await
    }
}

#[async_trait]
impl InvoiceModel for LlmClient {
    async fn complete(&self, ocr_text: &str) -> Result<String, ExtractError> {
        LlmClient::complete(self, ocr_text).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A user-facing status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Rows, category sums and chart slices for one or more invoices.
#[derive(Debug, Clone, Serialize)]
pub struct TableView {
    pub rows: Vec<InvoiceRow>,
    pub category_totals: CategoryTotals,
    pub slices: Vec<PieSlice>,
}

impl TableView {
    fn from_table(table: &InvoiceTable, mode: AggregationMode) -> Self {
        let category_totals = table.category_totals(mode);
        let slices = chart::pie_slices(&category_totals);
        Self {
            rows: table.rows().to_vec(),
            category_totals,
            slices,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Processed {
        filename: String,
        #[serde(flatten)]
        view: TableView,
    },
    Failed {
        filename: String,
        stage: &'static str,
        error: String,
    },
}

/// Everything the presentation layer needs to render one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub notices: Vec<Notice>,
    pub files: Vec<FileOutcome>,
    /// All successful files together; `None` when nothing succeeded.
    pub summary: Option<TableView>,
}

impl BatchReport {
    pub fn processed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f, FileOutcome::Processed { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.files.len() - self.processed_count()
    }
}

pub struct Pipeline {
    recognizer: Arc<dyn TextRecognizer>,
    model: Arc<dyn InvoiceModel>,
    aggregation: AggregationMode,
}

impl Pipeline {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        model: Arc<dyn InvoiceModel>,
        aggregation: AggregationMode,
    ) -> Self {
        Self {
            recognizer,
            model,
            aggregation,
        }
    }

    /// Process uploads one at a time, in order. A failing file is reported
    /// and skipped; it never stops the rest of the batch.
    pub async fn process_batch(&self, uploads: Vec<Upload>) -> BatchReport {
        if uploads.is_empty() {
            warn!("Batch triggered with no uploads");
            return BatchReport {
                notices: vec![Notice::new(NoticeLevel::Warning, "No invoices uploaded")],
                files: Vec::new(),
                summary: None,
            };
        }

        info!(count = uploads.len(), "Processing batch");
        let mut notices = Vec::with_capacity(uploads.len());
        let mut files = Vec::with_capacity(uploads.len());
        let mut combined = InvoiceTable::new();

        for upload in &uploads {
            let span = info_span!("invoice", filename = %upload.filename);
            match self.process_file(upload).instrument(span).await {
                Ok(record) => {
                    let mut table = InvoiceTable::new();
                    table.push(record.clone());
                    combined.push(record);

                    let view = TableView::from_table(&table, self.aggregation);
                    info!(
                        rows = view.rows.len(),
                        categories = view.category_totals.len(),
                        "File processed"
                    );
                    notices.push(Notice::new(
                        NoticeLevel::Success,
                        format!("Processed {}", upload.filename),
                    ));
                    files.push(FileOutcome::Processed {
                        filename: upload.filename.clone(),
                        view,
                    });
                }
                Err(e) => {
                    warn!(filename = %upload.filename, stage = e.stage(), error = %e, "File skipped");
                    notices.push(Notice::new(
                        NoticeLevel::Error,
                        failure_message(&upload.filename, &e),
                    ));
                    files.push(FileOutcome::Failed {
                        filename: upload.filename.clone(),
                        stage: e.stage(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let summary =
            (!combined.is_empty()).then(|| TableView::from_table(&combined, self.aggregation));
        let report = BatchReport {
            notices,
            files,
            summary,
        };
        info!(
            processed = report.processed_count(),
            failed = report.failed_count(),
            "Batch complete"
        );
        report
    }

    async fn process_file(&self, upload: &Upload) -> Result<InvoiceRecord, FileError> {
        if !is_accepted(&upload.filename) {
            return Err(FileError::UnsupportedType(upload.filename.clone()));
        }

        let image = upload.read().await.map_err(FileError::Read)?;
        let text = self.recognizer.recognize(&upload.filename, &image).await?;
        let raw = self.model.complete(&text).await?;
        info!(chars = raw.len(), "Model reply received");

        let object = response_parser::parse_model_output(&raw)?;
        let record = InvoiceRecord::from_object(&object);
        info!(
            items = record.items.len(),
            category = %record.category_label(),
            total = record.total_amount(),
            "Invoice parsed"
        );
        Ok(record)
    }
}

fn failure_message(filename: &str, error: &FileError) -> String {
    match error {
        FileError::Ocr(e) => format!("OCR failed for {filename}: {e}"),
        FileError::UnsupportedType(_) => {
            format!("Skipped {filename}: only JPG and PNG images are accepted")
        }
        other => format!("Could not process {filename}: {other}"),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeModel, FakeRecognizer};
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const BREAD_REPLY: &str = "```json\n{\"Invoice_Number\":\"INV-1\",\"Total_Amount\":100,\"Category\":\"Food\",\"Items\":[{\"Item_Name\":\"Bread\",\"Quantity\":2,\"Unit_Price\":3,\"Line_Total\":6}]}\n```";

    fn pipeline(
        recognizer: Arc<FakeRecognizer>,
        model: Arc<FakeModel>,
        mode: AggregationMode,
    ) -> Pipeline {
        Pipeline::new(recognizer, model, mode)
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let model = Arc::new(FakeModel::default());
        let report = pipeline(recognizer.clone(), model.clone(), AggregationMode::PerInvoice)
            .process_batch(Vec::new())
            .await;

        assert_eq!(
            report.notices,
            vec![Notice::new(NoticeLevel::Warning, "No invoices uploaded")]
        );
        assert!(report.files.is_empty());
        assert!(report.summary.is_none());
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_single_invoice_scenario() {
        let recognizer = Arc::new(FakeRecognizer::with(&[("bread.jpg", "BREAD 2 x 3")]));
        let model = Arc::new(FakeModel::with(&[("BREAD 2 x 3", BREAD_REPLY)]));
        let report = pipeline(recognizer, model, AggregationMode::PerInvoice)
            .process_batch(vec![Upload::from_bytes("bread.jpg", vec![1, 2, 3])])
            .await;

        assert_eq!(report.processed_count(), 1);
        let FileOutcome::Processed { filename, view } = &report.files[0] else {
            panic!("expected success, got {:?}", report.files[0]);
        };
        assert_eq!(filename, "bread.jpg");
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].header.invoice_number, json!("INV-1"));
        assert_eq!(view.rows[0].item.item_name, json!("Bread"));
        assert_eq!(view.category_totals.len(), 1);
        assert_eq!(view.category_totals.get("Food"), Some(100.0));
        assert_eq!(view.slices.len(), 1);
        assert_eq!(report.notices[0].level, NoticeLevel::Success);
        assert_eq!(report.notices[0].message, "Processed bread.jpg");
    }

    #[tokio::test]
    async fn test_empty_ocr_skips_file_and_continues() {
        // "blank.png" has no canned text, so OCR yields {"ParsedResults":[]}
        let recognizer = Arc::new(FakeRecognizer::with(&[("bread.jpg", "BREAD 2 x 3")]));
        let model = Arc::new(FakeModel::with(&[("BREAD 2 x 3", BREAD_REPLY)]));
        let report = pipeline(recognizer.clone(), model.clone(), AggregationMode::PerInvoice)
            .process_batch(vec![
                Upload::from_bytes("blank.png", vec![0]),
                Upload::from_bytes("bread.jpg", vec![1]),
            ])
            .await;

        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(model.call_count(), 1);
        assert_eq!(report.files.len(), 2);
        assert!(matches!(
            &report.files[0],
            FileOutcome::Failed { filename, stage: "ocr", .. } if filename == "blank.png"
        ));
        assert!(matches!(&report.files[1], FileOutcome::Processed { .. }));
        assert_eq!(report.notices[0].level, NoticeLevel::Error);
        assert!(report.notices[0].message.starts_with("OCR failed for blank.png"));
        assert_eq!(report.notices[1].message, "Processed bread.jpg");
    }

    #[tokio::test]
    async fn test_model_and_parse_failures_are_per_file() {
        let recognizer = Arc::new(FakeRecognizer::with(&[
            ("a.jpg", "text a"),
            ("b.jpg", "text b"),
            ("c.jpg", "text c"),
            ("d.jpg", "text d"),
        ]));
        let model = Arc::new(FakeModel::with(&[
            ("text a", "```json\n[1, 2]\n```"),
            ("text b", "not json at all"),
            ("text d", BREAD_REPLY),
        ]));
        let report = pipeline(recognizer, model, AggregationMode::PerInvoice)
            .process_batch(
                ["a.jpg", "b.jpg", "c.jpg", "d.jpg"]
                    .into_iter()
                    .map(|n| Upload::from_bytes(n, vec![]))
                    .collect(),
            )
            .await;

        let stages: Vec<_> = report
            .files
            .iter()
            .map(|f| match f {
                FileOutcome::Failed { stage, .. } => *stage,
                FileOutcome::Processed { .. } => "ok",
            })
            .collect();
        assert_eq!(stages, vec!["parse", "parse", "model", "ok"]);
        assert!(report.notices[0].message.starts_with("Could not process a.jpg"));
        assert!(report.notices[0].message.contains("unexpected shape"));
        assert!(report.notices[1].message.contains("unparsable model output"));
        assert_eq!(report.summary.as_ref().map(|s| s.rows.len()), Some(1));
    }

    #[tokio::test]
    async fn test_unsupported_type_is_not_sent_to_ocr() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let model = Arc::new(FakeModel::default());
        let report = pipeline(recognizer.clone(), model, AggregationMode::PerInvoice)
            .process_batch(vec![Upload::from_bytes("invoice.pdf", vec![])])
            .await;

        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            &report.files[0],
            FileOutcome::Failed { stage: "upload", .. }
        ));
        assert!(report.summary.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_path_is_not_an_ocr_failure() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = Arc::new(FakeRecognizer::with(&[("gone.png", "text")]));
        let model = Arc::new(FakeModel::default());
        let report = pipeline(recognizer.clone(), model, AggregationMode::PerInvoice)
            .process_batch(vec![Upload::from_path(dir.path().join("gone.png"))])
            .await;

        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            &report.files[0],
            FileOutcome::Failed { filename, stage: "upload", .. } if filename == "gone.png"
        ));
        let message = &report.notices[0].message;
        assert!(message.starts_with("Could not process gone.png: could not read file"));
        assert!(!message.contains("OCR"));
    }

    #[tokio::test]
    async fn test_path_upload_reaches_recognizer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bread.jpg");
        std::fs::write(&path, b"jpeg bytes").unwrap();
        let recognizer = Arc::new(FakeRecognizer::with(&[("bread.jpg", "BREAD 2 x 3")]));
        let model = Arc::new(FakeModel::with(&[("BREAD 2 x 3", BREAD_REPLY)]));
        let report = pipeline(recognizer, model, AggregationMode::PerInvoice)
            .process_batch(vec![Upload::from_path(path)])
            .await;

        assert_eq!(report.processed_count(), 1);
        assert_eq!(report.notices[0].message, "Processed bread.jpg");
    }

    #[tokio::test]
    async fn test_summary_combines_files_in_order() {
        let second = r#"{"Invoice_Number":"INV-2","Total_Amount":40,"Category":"Travel",
            "Items":[{"Item_Name":"Train"},{"Item_Name":"Bus"}]}"#;
        let recognizer = Arc::new(FakeRecognizer::with(&[("1.png", "one"), ("2.png", "two")]));
        let model = Arc::new(FakeModel::with(&[("one", BREAD_REPLY), ("two", second)]));

        for (mode, travel) in [
            (AggregationMode::PerInvoice, 40.0),
            (AggregationMode::PerRow, 80.0),
        ] {
            let report = pipeline(recognizer.clone(), model.clone(), mode)
                .process_batch(vec![
                    Upload::from_bytes("1.png", vec![]),
                    Upload::from_bytes("2.png", vec![]),
                ])
                .await;

            let summary = report.summary.unwrap();
            let items: Vec<_> = summary.rows.iter().map(|r| r.item.item_name.clone()).collect();
            assert_eq!(items, vec![json!("Bread"), json!("Train"), json!("Bus")]);
            assert_eq!(summary.category_totals.get("Food"), Some(100.0));
            assert_eq!(summary.category_totals.get("Travel"), Some(travel));
            let pct: f64 = summary.slices.iter().map(|s| s.percent).sum();
            assert!((pct - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_accepted_extensions() {
        assert!(is_accepted("scan.JPG"));
        assert!(is_accepted("scan.jpeg"));
        assert!(is_accepted("scan.png"));
        assert!(!is_accepted("scan.gif"));
        assert!(!is_accepted("scan"));
    }

    #[test]
    fn test_report_serializes_status_tag() {
        let report = BatchReport {
            notices: vec![],
            files: vec![FileOutcome::Failed {
                filename: "x.png".into(),
                stage: "ocr",
                error: "OCR returned no text".into(),
            }],
            summary: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["files"][0]["status"], "failed");
        assert_eq!(value["files"][0]["filename"], "x.png");
    }
}
