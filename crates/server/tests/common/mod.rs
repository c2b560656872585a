//! Common test utilities for E2E testing with mock processors.
//!
//! Builds the full server stack in-process, with the worker pool running
//! against mock processors so no LibreOffice/FFmpeg binaries are needed.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use fileflip_core::{
    AdmissionController, Config, ConversionPlan, FailoverJobStore, JobStore, ProcessContext,
    Processor, ProcessorError, ProcessorFactory, ProcessorOutput, SqliteJobStore, WorkerPool,
};
use fileflip_server::api::create_router;
use fileflip_server::state::AppState;

/// Mock processor that writes a plausible output file for the target format.
struct MockProcessor {
    target: String,
    fail: bool,
}

#[async_trait]
impl Processor for MockProcessor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError> {
        if self.fail {
            return Err(ProcessorError::Unsupported {
                reason: "mock processor configured to fail".to_string(),
            });
        }

        ctx.progress.report(50);

        let filename = format!("converted.{}", self.target);
        let output_path = ctx.work_dir.join(&filename);
        let contents: &[u8] = if self.target == "pdf" {
            b"%PDF-1.4 mock converter output"
        } else {
            b"mock converter output"
        };
        std::fs::write(&output_path, contents)?;

        ProcessorOutput::from_file(&output_path, filename)
    }
}

fn mock_factory(fail: bool) -> ProcessorFactory {
    Arc::new(move |plan: &ConversionPlan, _tools| {
        let target = match plan {
            ConversionPlan::Document { target }
            | ConversionPlan::Spreadsheet { target }
            | ConversionPlan::Media { target } => target.clone(),
            ConversionPlan::AudioEffect { .. } => "mp3".to_string(),
            ConversionPlan::Archive { .. } => "zip".to_string(),
        };
        Box::new(MockProcessor { target, fail }) as Box<dyn Processor>
    })
}

/// Knobs for fixture construction.
pub struct TestConfig {
    pub anonymous_quota: u32,
    pub premium_keys: Vec<String>,
    pub document_max_bytes: Option<u64>,
    /// Leave the pool stopped to observe jobs stuck in `queued`.
    pub start_pool: bool,
    /// Start with the durable store already failed over.
    pub degraded_store: bool,
    /// Make every conversion fail terminally.
    pub failing_processor: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            anonymous_quota: 100,
            premium_keys: Vec::new(),
            document_max_bytes: None,
            start_pool: true,
            degraded_store: false,
            failing_processor: false,
        }
    }
}

/// Test fixture running the full router in-process.
pub struct TestFixture {
    pub router: Router,
    pub store: Arc<FailoverJobStore>,
    pub temp_dir: TempDir,
    pool: Arc<WorkerPool>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub bytes: Vec<u8>,
    pub headers: HeaderMap,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.database.path = temp_dir.path().join("test.db");
        config.storage.upload_dir = temp_dir.path().join("uploads");
        config.storage.results_dir = temp_dir.path().join("results");
        config.storage.work_dir = temp_dir.path().join("work");
        config.admission.anonymous_quota = test_config.anonymous_quota;
        config.admission.premium_keys = test_config.premium_keys.clone();
        if let Some(cap) = test_config.document_max_bytes {
            config.limits.document_max_bytes = cap;
        }
        config.workers.concurrency = 2;
        config.workers.poll_interval_ms = 10;
        config.workers.backoff_base_secs = 0;
        config.workers.backoff_max_secs = 0;

        let store = if test_config.degraded_store {
            Arc::new(FailoverJobStore::degraded_from_start())
        } else {
            let durable =
                SqliteJobStore::new(&config.database.path).expect("Failed to create job store");
            Arc::new(FailoverJobStore::new(Box::new(durable)))
        };

        let admission = AdmissionController::new(config.admission.clone());

        let pool = Arc::new(
            WorkerPool::new(
                config.workers.clone(),
                config.tools.clone(),
                Arc::clone(&store) as Arc<dyn JobStore>,
                config.storage.work_dir.clone(),
                config.storage.results_dir.clone(),
            )
            .with_factory(mock_factory(test_config.failing_processor)),
        );

        if test_config.start_pool {
            pool.start();
        }

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&store),
            admission,
            Arc::clone(&pool),
        ));

        let router = create_router(state);

        Self {
            router,
            store,
            temp_dir,
            pool,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.get_with_headers(path, &[]).await
    }

    /// Send a GET request with extra headers.
    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");
        self.send(request).await
    }

    /// Submit a file to POST /convert as multipart/form-data.
    pub async fn post_convert(
        &self,
        filename: &str,
        file_bytes: &[u8],
        target_format: &str,
    ) -> TestResponse {
        self.post_convert_full(filename, file_bytes, Some(target_format), None, &[])
            .await
    }

    /// Full-control convert submission: optional target, options JSON, headers.
    pub async fn post_convert_full(
        &self,
        filename: &str,
        file_bytes: &[u8],
        target_format: Option<&str>,
        options_json: Option<&str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        const BOUNDARY: &str = "fileflip-test-boundary";

        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(file_bytes);
        body.extend_from_slice(b"\r\n");

        if let Some(target) = target_format {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"target_format\"\r\n\r\n{}\r\n",
                    BOUNDARY, target
                )
                .as_bytes(),
            );
        }

        if let Some(options) = options_json {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"options\"\r\n\r\n{}\r\n",
                    BOUNDARY, options
                )
                .as_bytes(),
            );
        }

        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let mut builder = Request::builder()
            .method("POST")
            .uri("/convert")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder
            .body(Body::from(body))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Poll /status/{id} until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, job_id: &str) -> TestResponse {
        for _ in 0..500 {
            let response = self.get(&format!("/status/{}", job_id)).await;
            let status = response.body["status"].as_str().unwrap_or("").to_string();
            if status == "completed" || status == "failed" {
                return response;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    /// Stop the worker pool.
    #[allow(dead_code)]
    pub async fn stop_pool(&self) {
        self.pool.stop().await;
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes()
            .to_vec();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            body,
            bytes,
            headers,
        }
    }
}
