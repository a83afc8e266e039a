//! Document source loader.
//!
//! Produces the raw bytes of the reference document from either a local
//! path or a remote URL.
//!
//! Remote mode issues one blocking-style GET (whole body buffered, no size
//! cap, no retry) and writes a local copy to
//! `{local_copy_dir}/{display_name}.{ext}` before returning, so the
//! document can also be served statically.
//!
//! # Content Type Detection
//!
//! Resolution order: `source.mime_type` from config, then the path or URL
//! extension, then the response `Content-Type` header (remote only), then
//! `application/octet-stream`.
//!
//! | Extension | MIME Type |
//! |-----------|----------|
//! | `.pdf` | `application/pdf` |
//! | `.txt` | `text/plain` |
//! | `.md` | `text/markdown` |
//! | `.html`, `.htm` | `text/html` |
//! | `.csv` | `text/csv` |
//! | `.json` | `application/json` |

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::models::{SourceDocument, SourceOrigin};

const FALLBACK_MIME: &str = "application/octet-stream";

/// Load the configured source document.
pub async fn load_source(config: &SourceConfig, client: &reqwest::Client) -> Result<SourceDocument> {
    match (&config.path, &config.url) {
        (Some(path), None) => load_path(config, path).await,
        (None, Some(url)) => load_url(config, client, url).await,
        _ => bail!("exactly one of source.path or source.url must be set"),
    }
}

async fn load_path(config: &SourceConfig, path: &Path) -> Result<SourceDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read source document: {}", path.display()))?;

    let mime_type = config
        .mime_type
        .clone()
        .or_else(|| mime_from_name(&path.to_string_lossy()).map(str::to_string))
        .unwrap_or_else(|| FALLBACK_MIME.to_string());

    tracing::info!(path = %path.display(), bytes = bytes.len(), %mime_type, "source document read");

    Ok(SourceDocument {
        bytes,
        mime_type,
        display_name: config.display_name.clone(),
        origin: SourceOrigin::Path(path.to_path_buf()),
    })
}

async fn load_url(config: &SourceConfig, client: &reqwest::Client, url: &str) -> Result<SourceDocument> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("GET {} returned {}", url, status);
    }

    let header_mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty());

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("reading body of {}", url))?
        .to_vec();

    tracing::info!(%url, bytes = bytes.len(), "source document downloaded");

    let mime_type = config
        .mime_type
        .clone()
        .or_else(|| mime_from_name(url).map(str::to_string))
        .or(header_mime)
        .unwrap_or_else(|| FALLBACK_MIME.to_string());

    let copy_path = local_copy_path(&config.local_copy_dir, &config.display_name, &mime_type);
    write_local_copy(&copy_path, &bytes).await?;
    tracing::info!(path = %copy_path.display(), "local copy saved");

    Ok(SourceDocument {
        bytes,
        mime_type,
        display_name: config.display_name.clone(),
        origin: SourceOrigin::Url(url.to_string()),
    })
}

async fn write_local_copy(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write local copy: {}", path.display()))
}

/// Where the downloaded copy of a remote document is written.
pub fn local_copy_path(dir: &Path, display_name: &str, mime_type: &str) -> PathBuf {
    let stem: String = display_name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    dir.join(format!("{}.{}", stem, extension_for_mime(mime_type)))
}

/// Map a file name or URL to a MIME type by extension.
pub fn mime_from_name(name: &str) -> Option<&'static str> {
    // Drop query string and fragment before looking at the extension.
    let name = name.split(['?', '#']).next().unwrap_or(name);
    let last = name.rsplit('/').next().unwrap_or(name);
    let (_, ext) = last.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        "md" => Some("text/markdown"),
        "html" | "htm" => Some("text/html"),
        "csv" => Some("text/csv"),
        "json" => Some("application/json"),
        _ => None,
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/markdown" => "md",
        "text/html" => "html",
        "text/csv" => "csv",
        "application/json" => "json",
        _ => "bin",
    }
}
