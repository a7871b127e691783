use crate::batch::{Batch, BatchSink};
use crate::config::types::Config;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// The only response body the collector sends for an accepted batch.
pub const SUCCESS_BODY: &[u8] = br#"{"code":"0000"}"#;

const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collector rejected batch with code {code}")]
    Rejected { code: String },

    #[error("unexpected collector response (status {status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
struct CollectorReply {
    code: String,
}

/// Sends batches to the collector as multipart uploads, one attempt each.
#[derive(Debug, Clone)]
pub struct Uploader {
    url: String,
    app: String,
    client: reqwest::Client,
}

impl Uploader {
    pub fn new(url: &str, app: &str, timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.to_string(),
            app: app.to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, UploadError> {
        Self::new(&config.url, &config.app, config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one batch. Succeeds only on a 2xx answer whose body is exactly
    /// `{"code":"0000"}`.
    pub async fn send(&self, body: &[u8], filename: &str, count: usize) -> Result<(), UploadError> {
        let log_part = Part::bytes(body.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .part("log", log_part)
            .text("app", self.app.clone());

        debug!(file = %filename, count = count, bytes = body.len(), "Posting batch");

        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        let reply = response.bytes().await?;

        check_reply(status.as_u16(), status.is_success(), &reply)
    }
}

#[async_trait]
impl BatchSink for Uploader {
    async fn send(&self, batch: &Batch) -> Result<(), UploadError> {
        Uploader::send(self, &batch.body, &batch.filename, batch.count).await
    }
}

fn check_reply(status: u16, is_success: bool, body: &[u8]) -> Result<(), UploadError> {
    if is_success && body == SUCCESS_BODY {
        return Ok(());
    }

    if is_success {
        if let Ok(reply) = serde_json::from_slice::<CollectorReply>(body) {
            return Err(UploadError::Rejected { code: reply.code });
        }
    }

    let mut text = String::from_utf8_lossy(body).into_owned();
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    Err(UploadError::UnexpectedResponse { status, body: text })
}
