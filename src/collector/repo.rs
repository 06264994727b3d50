//! Repository archive size. Redirects are followed by hand so the depth
//! limit and the error for each failure mode stay under our control.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::metric::MetricValue;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("redirect too deep (limit {limit})")]
    RedirectTooDeep { limit: u32 },
    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("redirect from {url} without a Location header")]
    MissingLocation { url: String },
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
}

/// One HTTP response, redirects not followed.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

pub trait HttpGet {
    fn get(&self, url: &str) -> Result<Response, FetchError>;
}

pub struct ReqwestGet {
    client: reqwest::blocking::Client,
}

impl ReqwestGet {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("rtstats/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpGet for ReqwestGet {
    fn get(&self, url: &str) -> Result<Response, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self.client.get(url).send().map_err(transport)?;
        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = if status.is_success() {
            response.bytes().map_err(transport)?.to_vec()
        } else {
            Vec::new()
        };
        Ok(Response {
            status: status.as_u16(),
            location,
            body,
        })
    }
}

/// GET `url`, following at most `limit - 1` redirects: each request spends
/// one unit of `limit` and a request with nothing left fails.
pub fn fetch(http: &dyn HttpGet, url: &str, limit: u32) -> Result<Vec<u8>, FetchError> {
    let mut current = url.to_string();
    let mut remaining = limit;
    loop {
        if remaining == 0 {
            return Err(FetchError::RedirectTooDeep { limit });
        }
        remaining -= 1;

        let response = http.get(&current)?;
        match response.status {
            200..=299 => return Ok(response.body),
            300..=399 => {
                let location = response.location.ok_or_else(|| FetchError::MissingLocation {
                    url: current.clone(),
                })?;
                let next = resolve(&current, &location)?;
                debug!("redirect {current} -> {next}");
                current = next;
            }
            status => {
                return Err(FetchError::Status {
                    status,
                    url: current,
                });
            }
        }
    }
}

fn resolve(base: &str, location: &str) -> Result<String, FetchError> {
    let invalid = |url: &str, reason: String| FetchError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let base_url = Url::parse(base).map_err(|e| invalid(base, e.to_string()))?;
    let next = base_url
        .join(location)
        .map_err(|e| invalid(location, e.to_string()))?;
    Ok(next.into())
}

pub fn collect(config: &Config) -> Result<MetricValue> {
    let http = ReqwestGet::new(Duration::from_secs(config.repo.timeout_secs))?;
    collect_with(config, &http)
}

pub fn collect_with(config: &Config, http: &dyn HttpGet) -> Result<MetricValue> {
    config.ensure_data_dir()?;
    info!("Downloading {} ...", config.repo.archive_url);
    let body = fetch(http, &config.repo.archive_url, config.repo.max_redirects)?;

    let archive = config.data_path(&config.repo.archive_file);
    std::fs::write(&archive, &body)
        .with_context(|| format!("failed to write {}", archive.display()))?;
    let size = std::fs::metadata(&archive)
        .with_context(|| format!("failed to stat {}", archive.display()))?
        .len();

    if !config.repo.keep_archive {
        std::fs::remove_file(&archive)
            .with_context(|| format!("failed to remove {}", archive.display()))?;
    }
    info!("done, {size} bytes");
    Ok(MetricValue::bytes(size))
}
