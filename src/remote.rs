use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::info;

use crate::error::KiraError;

/// Fetches remote reference files (taxonomy dumps, assembly summaries,
/// accession maps) to a local path.
pub trait Downloader {
    fn download(&self, url: &str, destination: &Path) -> Result<(), KiraError>;
}

/// Downloads every url into `dir`, keeping the remote file names.
pub fn download_all(
    downloader: &dyn Downloader,
    urls: &[&str],
    dir: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, KiraError> {
    std::fs::create_dir_all(dir.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("create {dir}: {err}")))?;
    let mut files = Vec::with_capacity(urls.len());
    for url in urls {
        let name = url.rsplit('/').next().unwrap_or(url);
        let destination = dir.join(name);
        downloader.download(url, destination.as_std_path())?;
        files.push(destination);
    }
    Ok(files)
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-db/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn normalize_url(url: &str) -> String {
        if let Some(rest) = url.strip_prefix("ftp://ftp.ncbi.nlm.nih.gov/") {
            return format!("https://ftp.ncbi.nlm.nih.gov/{}", rest);
        }
        url.to_string()
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, KiraError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::Http(err.to_string()));
                }
            }
        }
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        let url = Self::normalize_url(url);
        info!(url = %url, "downloading");
        let mut response = self.send_with_retries(&url)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download request failed".to_string());
            return Err(KiraError::HttpStatus { status, message });
        }
        let mut file =
            File::create(destination).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
