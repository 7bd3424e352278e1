//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per job endpoint.
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::Value;
use std::time::{Duration, Instant};

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    pub async fn health(&self) -> Response {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Health request failed")
    }

    /// Uploads `data` as the `file` field of a multipart form
    pub async fn submit(&self, data: &[u8], filename: &str, content_type: &str) -> Response {
        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type)
            .expect("Invalid content type");
        self.submit_form(Form::new().part("file", part)).await
    }

    pub async fn submit_form(&self, form: Form) -> Response {
        self.client
            .post(format!("{}/api/v1/submit", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("Submit request failed")
    }

    pub async fn status(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/api/v1/status/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Status request failed")
    }

    pub async fn result(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/api/v1/result/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Result request failed")
    }

    /// Submits an upload that must be accepted and returns its job id
    pub async fn submit_ok(&self, data: &[u8], filename: &str, content_type: &str) -> String {
        let response = self.submit(data, filename, content_type).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Invalid submit response");
        body["job_id"]
            .as_str()
            .expect("Missing job_id")
            .to_string()
    }

    /// Polls the status route until the job is done or failed
    ///
    /// # Panics
    ///
    /// Panics if the job does not settle within JOB_SETTLE_TIMEOUT_MS.
    pub async fn wait_until_settled(&self, job_id: &str) -> String {
        let start = Instant::now();
        loop {
            let body: Value = self
                .status(job_id)
                .await
                .json()
                .await
                .expect("Invalid status response");
            let status = body["status"].as_str().unwrap_or_default().to_string();
            if status == "done" || status == "failed" {
                return status;
            }
            if start.elapsed() > Duration::from_millis(JOB_SETTLE_TIMEOUT_MS) {
                panic!("Job {} still {} after {}ms", job_id, status, JOB_SETTLE_TIMEOUT_MS);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
