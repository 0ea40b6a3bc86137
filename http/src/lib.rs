use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use vmstrap_fs::{self as fs, FsError};

const REQUEST_TIMEOUT_SEC: u64 = 30;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{bar:40.green/black}] {bytes:>11.green}/{total_bytes:<11.green} {bytes_per_sec:>13.red} eta {eta:.blue}";
const SPINNER_TEMPLATE: &str = "{msg}\n{spinner:.green} {bytes:>11.green} {bytes_per_sec:>13.red}";

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] reqwest::Error),

    #[error("HTTP request error for '{url}': {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP status {status} for '{url}'")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("HTTP stream error for '{url}': {source}")]
    Stream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("File write error for '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .read_timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SEC))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(HttpError::BuildClient)?;
        Ok(HttpClient { client })
    }

    /// Stream `url` into `file_path`.
    ///
    /// The body is written to `<file_path>.tmp` and renamed once complete, so
    /// a failed download never leaves a file at `file_path`. An existing file
    /// at `file_path` is kept as is.
    pub async fn download_file<P: AsRef<Path>>(
        &self,
        url: &str,
        file_path: P,
    ) -> Result<(), HttpError> {
        let file_path = file_path.as_ref();

        if fs::path_exists(file_path).await? {
            debug!("already downloaded: {}", file_path.display());
            return Ok(());
        }

        let temp_file = fs::temp_path(file_path);

        if fs::path_exists(&temp_file).await? {
            fs::remove_file(&temp_file).await?;
        }

        info!("downloading {url} to {}", file_path.display());

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| HttpError::Request {
                url: url.to_owned(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(HttpError::Status {
                url: url.to_owned(),
                status: resp.status(),
            });
        }

        let mut file = fs::create_file(&temp_file).await?;

        let progress = progress_bar(url, resp.content_length());
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|source| HttpError::Stream {
                url: url.to_owned(),
                source,
            })?;
            file.write_all(&bytes)
                .await
                .map_err(|source| HttpError::Write {
                    path: temp_file.clone(),
                    source,
                })?;
            written += bytes.len() as u64;
            progress.inc(bytes.len() as u64);
        }
        progress.finish_with_message(format!("Downloaded {url}"));

        // Ensure all data is flushed before renaming
        file.flush().await.map_err(|source| HttpError::Write {
            path: temp_file.clone(),
            source,
        })?;

        fs::rename_file(&temp_file, file_path).await?;

        info!("downloaded {written} bytes");

        Ok(())
    }
}

/// A byte-counting bar when the server announced a length, a spinner otherwise.
fn progress_bar(url: &str, content_length: Option<u64>) -> ProgressBar {
    let (progress, template) = match content_length {
        Some(len) => (ProgressBar::new(len), BAR_TEMPLATE),
        None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
    };
    let style = ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
    progress.set_style(style);
    progress.set_message(format!("Downloading {url}"));
    progress
}
