//! Integration tests for the conversion engine.
//!
//! The remote service and pdfium are replaced by in-process fakes, so these
//! run offline and fast. What they exercise is everything in between:
//! splitting, persistence, submission order, polling, combination, asset
//! renumbering, crash resumption and cleanup.
//!
//! Run with:
//!   cargo test --test engine -- --nocapture

use async_trait::async_trait;
use chunkmark::{
    ChunkmarkError, ConversionOptions, ConversionService, Engine, EngineConfig, FileJobStore, Job,
    JobState, JobStore, PageExtractor, PageRange, RateLimiter, RemoteOutput, RemoteStatus,
    ServiceError,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Conversion service double.
///
/// Each request stays pending for `pending_polls` status calls (or the
/// count in `pending_for` for its file name), then completes with the
/// output registered for the uploaded file name (or a generic one).
/// Submissions of `reject` are refused with HTTP 400.
#[derive(Default)]
struct MockService {
    outputs: HashMap<String, RemoteOutput>,
    reject: Option<String>,
    pending_polls: u32,
    pending_for: HashMap<String, u32>,
    not_found: bool,
    requests: Mutex<HashMap<String, (String, u32)>>,
    submitted: Mutex<Vec<String>>,
    status_calls: AtomicUsize,
}

impl MockService {
    fn submits(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversionService for MockService {
    async fn submit(
        &self,
        file_name: &str,
        _bytes: &[u8],
        _mime: &str,
        _options: &ConversionOptions,
    ) -> Result<String, ServiceError> {
        if self.reject.as_deref() == Some(file_name) {
            return Err(ServiceError::Http {
                status: 400,
                body: "invalid document".into(),
            });
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(file_name.to_string());
        let id = format!("req-{}", submitted.len());
        self.requests
            .lock()
            .unwrap()
            .insert(id.clone(), (file_name.to_string(), 0));
        Ok(id)
    }

    async fn status(&self, request_id: &str) -> Result<RemoteStatus, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.not_found {
            return Err(ServiceError::NotFound {
                request_id: request_id.to_string(),
            });
        }
        let mut requests = self.requests.lock().unwrap();
        let Some((file_name, polls)) = requests.get_mut(request_id) else {
            return Err(ServiceError::NotFound {
                request_id: request_id.to_string(),
            });
        };
        let pending_polls = self
            .pending_for
            .get(file_name.as_str())
            .copied()
            .unwrap_or(self.pending_polls);
        if *polls < pending_polls {
            *polls += 1;
            return Ok(RemoteStatus::Pending);
        }
        let output = self.outputs.get(file_name.as_str()).cloned().unwrap_or_else(|| RemoteOutput {
            markdown: Some(format!("content of {file_name}")),
            ..Default::default()
        });
        Ok(RemoteStatus::Complete(output))
    }
}

/// Page extractor double: every document has `pages` pages; extracted units
/// are tiny PDF-looking files.
struct FakeExtractor {
    pages: usize,
    calls: AtomicUsize,
}

impl FakeExtractor {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            calls: AtomicUsize::new(0),
        })
    }
}

impl PageExtractor for FakeExtractor {
    fn page_count(&self, _input: &Path) -> Result<usize, ChunkmarkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages)
    }

    fn extract(&self, _input: &Path, pages: PageRange, dest: &Path) -> Result<(), ChunkmarkError> {
        let body = format!("%PDF-1.4\n% pages {}-{}\n%%EOF\n", pages.start, pages.end);
        std::fs::write(dest, body).map_err(|e| ChunkmarkError::storage(dest, e))
    }
}

/// File store whose saves can be switched to fail.
struct FlakyStore {
    inner: FileJobStore,
    fail_saves: AtomicBool,
}

impl JobStore for FlakyStore {
    fn save(&self, job: &Job) -> Result<(), ChunkmarkError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ChunkmarkError::storage(
                self.inner.dir(),
                std::io::Error::other("disk full"),
            ));
        }
        self.inner.save(job)
    }

    fn load(&self, id: &str) -> Result<Option<Job>, ChunkmarkError> {
        self.inner.load(id)
    }

    fn delete(&self, id: &str) -> Result<bool, ChunkmarkError> {
        self.inner.delete(id)
    }

    fn list_all(&self) -> Result<Vec<Job>, ChunkmarkError> {
        self.inner.list_all()
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Harness {
    root: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    fn config(&self) -> chunkmark::EngineConfigBuilder {
        EngineConfig::builder()
            .api_key("test-key")
            .unit_size(25)
            .retry_backoff_ms(1)
            .poll_interval_secs(0)
            .cache_dir(self.path("cache"))
            .workspace_root(self.path("chunks"))
            .output_dir(self.path("converted"))
    }

    fn engine(
        &self,
        config: EngineConfig,
        service: Arc<MockService>,
        extractor: Arc<FakeExtractor>,
    ) -> Engine {
        let store = FileJobStore::open(config.cache_dir.clone()).unwrap();
        let limiter = RateLimiter::per_minute(config.requests_per_minute);
        Engine::new(
            config,
            service,
            Arc::new(store),
            extractor,
            Arc::new(limiter),
        )
    }

    fn engine_with_store(
        &self,
        config: EngineConfig,
        service: Arc<MockService>,
        store: Arc<dyn JobStore>,
        extractor: Arc<FakeExtractor>,
    ) -> Engine {
        let limiter = RateLimiter::per_minute(config.requests_per_minute);
        Engine::new(config, service, store, extractor, Arc::new(limiter))
    }

    fn write_pdf(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"%PDF-1.4\n% source document\n%%EOF\n").unwrap();
        path
    }

    fn workspace_is_empty(&self) -> bool {
        match std::fs::read_dir(self.path("chunks")) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

fn output_with_image(markdown: &str, image: &str) -> RemoteOutput {
    let mut images = BTreeMap::new();
    // "hi" in base64
    images.insert(image.to_string(), "aGk=".to_string());
    RemoteOutput {
        markdown: Some(markdown.to_string()),
        images,
        ..Default::default()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn split_job_merges_in_order_and_renumbers_assets() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let mut outputs = HashMap::new();
    outputs.insert(
        "001of002.pdf".to_string(),
        output_with_image("# Part one\n\n![](_page_2_Figure_0.jpeg)", "_page_2_Figure_0.jpeg"),
    );
    outputs.insert(
        "002of002.pdf".to_string(),
        output_with_image("# Part two\n\n![](_page_5_Figure_0.jpeg)", "_page_5_Figure_0.jpeg"),
    );
    let service = Arc::new(MockService {
        outputs,
        pending_polls: 1,
        ..Default::default()
    });
    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));

    let job = engine.create_job(&source).await.unwrap();
    assert_eq!(job.units.len(), 2);
    assert_eq!(job.state, JobState::InFlight);
    assert_eq!(job.units[1].pages, Some(PageRange { start: 25, end: 47 }));
    assert_eq!(service.submits(), vec!["001of002.pdf", "002of002.pdf"]);

    let report = engine.run_until_idle().await.unwrap();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert_eq!(report.completed.len(), 1);

    let (id, output) = &report.completed[0];
    assert_eq!(id, &job.id);
    assert_eq!(output, &h.path("converted/report/report.md"));

    let content = std::fs::read_to_string(output).unwrap();
    let one = content.find("# Part one").expect("first unit present");
    let two = content.find("# Part two").expect("second unit present");
    assert!(one < two);
    assert!(content.contains("](images/_page_2_Figure_0.jpeg)"));
    assert!(content.contains("](images/_page_30_Figure_0.jpeg)"));
    assert!(!content.contains("_page_5_"));
    assert_eq!(
        std::fs::read(h.path("converted/report/images/_page_30_Figure_0.jpeg")).unwrap(),
        b"hi"
    );

    // Terminal jobs leave nothing behind but the output.
    assert!(engine.jobs().unwrap().is_empty());
    assert!(h.workspace_is_empty());
    assert!(source.exists());
}

#[tokio::test]
async fn submission_stops_at_first_failed_unit() {
    let h = Harness::new();
    let source = h.write_pdf("in/long.pdf");
    let service = Arc::new(MockService {
        reject: Some("002of005.pdf".into()),
        ..Default::default()
    });
    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(120));

    let job = engine.create_job(&source).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.units[0].state, JobState::InFlight);
    assert_eq!(job.units[1].state, JobState::Failed);
    assert!(job.units[2..].iter().all(|u| u.state == JobState::Pending));
    assert!(job.error.as_deref().unwrap().starts_with("Unit 1 failed"));

    // Only the first unit reached the service, and nothing is polled.
    assert_eq!(service.submits(), vec!["001of005.pdf"]);
    let report = engine.run_until_idle().await.unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(service.status_calls(), 0);
    assert!(engine.jobs().unwrap().is_empty());
    assert!(h.workspace_is_empty());
    assert!(!h.path("converted/long").exists());
}

#[tokio::test]
async fn restarted_engine_resumes_without_resubmitting() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let service = Arc::new(MockService {
        pending_polls: 2,
        ..Default::default()
    });

    let id = {
        let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));
        let job = engine.create_job(&source).await.unwrap();
        engine.sweep().await.unwrap();
        job.id
        // Engine dropped here, as if the process died between sweeps.
    };

    let persisted = FileJobStore::open(h.path("cache")).unwrap();
    let job = persisted.load(&id).unwrap().unwrap();
    assert!(job.units.iter().all(|u| u.state == JobState::InFlight));

    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));
    let report = engine.run_until_idle().await.unwrap();
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].0, id);
    assert_eq!(service.submits().len(), 2);

    let content = std::fs::read_to_string(&report.completed[0].1).unwrap();
    assert_eq!(content, "content of 001of002.pdf\n\ncontent of 002of002.pdf");
}

#[tokio::test]
async fn restart_with_one_unit_complete_polls_only_the_rest() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let mut pending_for = HashMap::new();
    pending_for.insert("002of002.pdf".to_string(), 1);
    let service = Arc::new(MockService {
        pending_for,
        ..Default::default()
    });

    let id = {
        let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));
        let job = engine.create_job(&source).await.unwrap();
        let report = engine.sweep().await.unwrap();
        assert_eq!(report.waiting, 1);
        job.id
    };

    let persisted = FileJobStore::open(h.path("cache")).unwrap();
    let job = persisted.load(&id).unwrap().unwrap();
    assert_eq!(job.units[0].state, JobState::Complete);
    assert_eq!(job.units[1].state, JobState::InFlight);
    assert!(job.units[0].result_path(&job.workspace).is_file());

    let polled_before = service.status_calls();
    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));
    let report = engine.run_until_idle().await.unwrap();
    assert_eq!(report.completed.len(), 1);
    assert_eq!(service.status_calls() - polled_before, 1);
    assert_eq!(service.submits(), vec!["001of002.pdf", "002of002.pdf"]);

    let content = std::fs::read_to_string(&report.completed[0].1).unwrap();
    assert_eq!(content, "content of 001of002.pdf\n\ncontent of 002of002.pdf");
}

#[tokio::test]
async fn job_with_a_failed_unit_is_never_polled() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let workspace = h.path("chunks/report_0000");
    std::fs::create_dir_all(&workspace).unwrap();
    let mut job = Job::new(
        "stale",
        &source,
        h.path("converted/report"),
        ConversionOptions::default(),
        25,
        &workspace,
    );
    job.add_unit(0, workspace.join("001of002.pdf"), Some(PageRange { start: 0, end: 25 }));
    job.add_unit(1, workspace.join("002of002.pdf"), Some(PageRange { start: 25, end: 47 }));
    job.unit_mut(0).unwrap().mark_in_flight("req-1");
    job.unit_mut(1).unwrap().mark_failed("rejected");
    FileJobStore::open(h.path("cache")).unwrap().save(&job).unwrap();

    let service = Arc::new(MockService::default());
    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));
    let report = engine.sweep().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("Unit 1 failed"), "{}", report.failed[0].1);
    assert_eq!(service.status_calls(), 0);
    assert!(engine.jobs().unwrap().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test]
async fn unsaved_progress_is_reported_and_retried() {
    let h = Harness::new();
    let source = h.write_pdf("in/short.pdf");
    let service = Arc::new(MockService::default());
    let store = Arc::new(FlakyStore {
        inner: FileJobStore::open(h.path("cache")).unwrap(),
        fail_saves: AtomicBool::new(false),
    });
    let config = h.config().max_retries(2).build().unwrap();
    let engine = h.engine_with_store(config, service.clone(), store.clone(), FakeExtractor::new(10));

    engine.create_job(&source).await.unwrap();
    store.fail_saves.store(true, Ordering::SeqCst);

    let report = engine.run_until_idle().await.unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].1.contains("disk full"), "{}", report.errors[0].1);
    assert!(!report.is_idle());
    // Bounded: one sweep past the retry budget, then the loop gives up.
    assert_eq!(service.status_calls(), 3);
    assert_eq!(engine.jobs().unwrap().len(), 1);

    store.fail_saves.store(false, Ordering::SeqCst);
    let report = engine.run_until_idle().await.unwrap();
    assert_eq!(report.completed.len(), 1);
    assert!(report.is_idle());
    assert_eq!(service.submits(), vec!["short.pdf"]);
}

#[tokio::test]
async fn undecodable_and_nested_assets_do_not_fail_the_job() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let mut second = output_with_image(
        "# Part two\n\n![](figs/_page_5_Figure_0.jpeg)\n\n![](_page_6_Figure_0.jpeg)",
        "figs/_page_5_Figure_0.jpeg",
    );
    second
        .images
        .insert("_page_6_Figure_0.jpeg".to_string(), "not base64!".to_string());
    let mut outputs = HashMap::new();
    outputs.insert("002of002.pdf".to_string(), second);
    let service = Arc::new(MockService {
        outputs,
        ..Default::default()
    });
    let engine = h.engine(h.config().build().unwrap(), service, FakeExtractor::new(47));

    engine.create_job(&source).await.unwrap();
    let report = engine.run_until_idle().await.unwrap();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert_eq!(report.completed.len(), 1);

    let content = std::fs::read_to_string(&report.completed[0].1).unwrap();
    assert!(content.contains("](images/_page_30_Figure_0.jpeg)"), "{content}");
    assert!(!content.contains("figs/"), "{content}");
    assert_eq!(
        std::fs::read(h.path("converted/report/images/_page_30_Figure_0.jpeg")).unwrap(),
        b"hi"
    );
    assert!(!h.path("converted/report/images/_page_31_Figure_0.jpeg").exists());
}

#[tokio::test]
async fn pending_units_are_resumed_in_order_after_restart() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let service = Arc::new(MockService::default());
    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));

    // A closed limiter stops submission before the first unit.
    engine.shutdown().await;
    let job = engine.create_job(&source).await.unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert!(job.units.iter().all(|u| u.state == JobState::Pending));
    assert!(service.submits().is_empty());
    drop(engine);

    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));
    let report = engine.run_until_idle().await.unwrap();
    assert_eq!(report.completed.len(), 1);
    assert_eq!(service.submits(), vec!["001of002.pdf", "002of002.pdf"]);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let service = Arc::new(MockService {
        pending_polls: u32::MAX,
        ..Default::default()
    });
    let engine = h.engine(h.config().build().unwrap(), service, FakeExtractor::new(47));

    let job = engine.create_job(&source).await.unwrap();
    assert!(job.workspace.exists());

    assert!(engine.cleanup(&job.id).await.unwrap());
    assert!(!job.workspace.exists());
    assert!(engine.jobs().unwrap().is_empty());

    assert!(!engine.cleanup(&job.id).await.unwrap());
    assert!(!engine.cleanup("never-existed").await.unwrap());
    assert!(source.exists());
}

#[tokio::test]
async fn unknown_request_fails_the_job() {
    let h = Harness::new();
    let source = h.write_pdf("in/report.pdf");
    let service = Arc::new(MockService {
        not_found: true,
        ..Default::default()
    });
    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));

    engine.create_job(&source).await.unwrap();
    let report = engine.run_until_idle().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("not found"), "{}", report.failed[0].1);
    // The first unit's failure is definitive; the second is never polled.
    assert_eq!(service.status_calls(), 1);
    assert!(engine.jobs().unwrap().is_empty());
    assert!(h.workspace_is_empty());
}

#[tokio::test]
async fn unsupported_file_never_reaches_the_service() {
    let h = Harness::new();
    let notes = h.path("in/notes.txt");
    std::fs::create_dir_all(notes.parent().unwrap()).unwrap();
    std::fs::write(&notes, "just some plain text\n").unwrap();
    let service = Arc::new(MockService::default());
    let engine = h.engine(h.config().build().unwrap(), service.clone(), FakeExtractor::new(47));

    let err = engine.create_job(&notes).await.unwrap_err();
    assert!(matches!(err, ChunkmarkError::UnsupportedType { .. }), "{err}");
    assert!(service.submits().is_empty());
    assert!(engine.jobs().unwrap().is_empty());
    assert!(h.workspace_is_empty());
}

#[tokio::test]
async fn missing_file_is_an_input_error() {
    let h = Harness::new();
    let engine = h.engine(
        h.config().build().unwrap(),
        Arc::new(MockService::default()),
        FakeExtractor::new(1),
    );
    let err = engine.create_jobs(&h.path("in/absent.pdf")).await.unwrap_err();
    assert!(matches!(err, ChunkmarkError::FileNotFound { .. }));
}

#[tokio::test]
async fn small_and_unchunked_documents_submit_the_original() {
    // Fits in one unit: the extractor is asked for a page count only.
    let h = Harness::new();
    let source = h.write_pdf("in/short.pdf");
    let service = Arc::new(MockService::default());
    let extractor = FakeExtractor::new(10);
    let engine = h.engine(h.config().build().unwrap(), service.clone(), extractor.clone());

    let job = engine.create_job(&source).await.unwrap();
    assert_eq!(job.units.len(), 1);
    assert_eq!(job.units[0].source_path, source);
    assert_eq!(service.submits(), vec!["short.pdf"]);
    let small = engine.run_until_idle().await.unwrap();
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

    // Chunking disabled: pdfium is never consulted, even for a long document.
    let h = Harness::new();
    let source = h.write_pdf("in/short.pdf");
    let service = Arc::new(MockService::default());
    let extractor = FakeExtractor::new(400);
    let engine = h.engine(h.config().no_chunk().build().unwrap(), service.clone(), extractor.clone());

    let job = engine.create_job(&source).await.unwrap();
    assert_eq!(job.units.len(), 1);
    assert_eq!(service.submits(), vec!["short.pdf"]);
    let unchunked = engine.run_until_idle().await.unwrap();
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);

    let a = std::fs::read_to_string(&small.completed[0].1).unwrap();
    let b = std::fs::read_to_string(&unchunked.completed[0].1).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, "content of short.pdf");
}

#[tokio::test]
async fn polling_gives_up_after_max_cycles() {
    let h = Harness::new();
    let source = h.write_pdf("in/short.pdf");
    let service = Arc::new(MockService {
        pending_polls: u32::MAX,
        ..Default::default()
    });
    let config = h.config().max_poll_cycles(3).build().unwrap();
    let engine = h.engine(config, service.clone(), FakeExtractor::new(10));

    engine.create_job(&source).await.unwrap();
    let report = engine.run_until_idle().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("gave up after 3 polling cycles"));
    assert_eq!(service.status_calls(), 3);
    assert!(engine.jobs().unwrap().is_empty());
}

#[tokio::test]
async fn directory_batch_skips_rejected_files() {
    let h = Harness::new();
    h.write_pdf("in/a.pdf");
    h.write_pdf("in/nested/b.pdf");
    std::fs::write(h.path("in/readme.txt"), "not a document\n").unwrap();
    let service = Arc::new(MockService::default());
    let config = h.config().job_concurrency(2).build().unwrap();
    let engine = h.engine(config, service.clone(), FakeExtractor::new(3));

    let batch = engine.create_jobs(&h.path("in")).await.unwrap();
    assert_eq!(batch.jobs.len(), 2);
    assert_eq!(batch.rejected.len(), 1);
    assert!(batch.rejected[0].0.ends_with("readme.txt"));

    let report = engine.run_until_idle().await.unwrap();
    assert_eq!(report.completed.len(), 2);
    assert!(h.path("converted/a/a.md").exists());
    assert!(h.path("converted/b/b.md").exists());
    assert!(h.workspace_is_empty());
}

#[tokio::test]
async fn existing_output_is_never_overwritten() {
    let h = Harness::new();
    let source = h.write_pdf("in/short.pdf");
    std::fs::create_dir_all(h.path("converted/short")).unwrap();
    std::fs::write(h.path("converted/short/short.md"), "keep me").unwrap();

    let engine = h.engine(
        h.config().build().unwrap(),
        Arc::new(MockService::default()),
        FakeExtractor::new(2),
    );
    engine.create_job(&source).await.unwrap();
    let report = engine.run_until_idle().await.unwrap();

    assert_eq!(report.completed[0].1, h.path("converted/short_1/short.md"));
    assert_eq!(
        std::fs::read_to_string(h.path("converted/short/short.md")).unwrap(),
        "keep me"
    );
}
