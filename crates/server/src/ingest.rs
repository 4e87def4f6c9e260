// server/ingest.rs
// Upload and URL ingestion: stream the body to a temp file, index it, and
// hand back an owned-temp DataFile. Also the startup default-CSV scan.

use esx_core::{build_index, CoreError, DataFile};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const UPLOAD_TEMP_PREFIX: &str = "esx-doctor-upload-";
pub const URL_TEMP_PREFIX: &str = "esx-doctor-url-";

const FETCH_TOTAL_TIMEOUT: Duration = Duration::from_secs(60);
const FETCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("URL must use http or https")]
    SchemeRejected,

    #[error("invalid URL")]
    InvalidUrl,

    #[error("failed to fetch URL: {0}")]
    Transport(String),

    #[error("URL returned status {0}")]
    BadStatus(u16),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Create a persistent temp file named `<prefix><random>.csv`. The file is
/// kept on disk; deletion is owned by the session replace/close paths.
pub fn create_temp_csv(prefix: &str) -> std::io::Result<(File, PathBuf)> {
    let tmp = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".csv")
        .tempfile()?;
    let (file, path) = tmp.keep().map_err(|err| err.error)?;
    Ok((file, path))
}

/// Index a freshly written temp file. On success the DataFile is marked
/// owned-temp and labeled; on failure the temp file is removed before the
/// error propagates.
pub fn index_temp_csv(path: PathBuf, label: &str) -> Result<DataFile, CoreError> {
    match build_index(&path) {
        Ok(mut df) => {
            df.owned_temp = true;
            let label = label.trim();
            df.label = if label.is_empty() {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            } else {
                label.to_string()
            };
            Ok(df)
        }
        Err(err) => {
            let _ = std::fs::remove_file(&path);
            Err(err)
        }
    }
}

/// Download `url` into a `esx-doctor-url-*.csv` temp file, returning the
/// temp path and the display label (URL basename when present). Connect and
/// total deadlines bound the transfer.
pub async fn fetch_url_to_temp(url: &str) -> Result<(PathBuf, String), FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| FetchError::InvalidUrl)?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return Err(FetchError::SchemeRejected),
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(FetchError::InvalidUrl);
    }

    let client = reqwest::Client::builder()
        .timeout(FETCH_TOTAL_TIMEOUT)
        .connect_timeout(FETCH_CONNECT_TIMEOUT)
        .build()
        .map_err(|err| FetchError::Transport(err.to_string()))?;

    let mut resp = client
        .get(parsed.clone())
        .send()
        .await
        .map_err(|err| FetchError::Transport(err.to_string()))?;
    if !resp.status().is_success() {
        return Err(FetchError::BadStatus(resp.status().as_u16()));
    }

    let (mut file, path) = create_temp_csv(URL_TEMP_PREFIX)?;
    loop {
        let chunk = match resp.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                let _ = std::fs::remove_file(&path);
                return Err(FetchError::Transport(err.to_string()));
            }
        };
        if let Err(err) = file.write_all(&chunk) {
            let _ = std::fs::remove_file(&path);
            return Err(err.into());
        }
    }

    let label = url_basename(&parsed).unwrap_or_else(|| url.to_string());
    Ok((path, label))
}

fn url_basename(url: &reqwest::Url) -> Option<String> {
    let base = Path::new(url.path()).file_name()?.to_string_lossy();
    if base.is_empty() || base == "." || base == "/" {
        return None;
    }
    Some(base.into_owned())
}

/// Startup fallback: the most recently modified `*.csv` in the working
/// directory, as an absolute path.
pub fn guess_default_csv() -> Option<PathBuf> {
    let entries = std::fs::read_dir(".").ok()?;
    let mut chosen: Option<(PathBuf, std::time::SystemTime)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        let newer = chosen
            .as_ref()
            .map(|(_, best)| modified > *best)
            .unwrap_or(true);
        if newer {
            chosen = Some((path, modified));
        }
    }
    let (path, _) = chosen?;
    std::path::absolute(&path).ok()
}
