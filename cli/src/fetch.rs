//! Fetching index, descriptor and bundle data.
//!
//! URLs resolve over HTTP, or from the local filesystem when prefixed with
//! `file://`.

use anyhow::{Context, Result};

const FILE_SCHEME: &str = "file://";

/// Downloads the given URL, or reads the file a `file://` URL points at.
pub async fn fetch(url: &str) -> Result<Vec<u8>> {
    if let Some(path) = url.strip_prefix(FILE_SCHEME) {
        return std::fs::read(path).with_context(|| format!("failed to read {}", path));
    }

    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("failed to fetch {}", url))?;
    let body = response
        .bytes()
        .await
        .with_context(|| format!("failed to read response body from {}", url))?;
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_urls_read_from_disk() {
        let path = std::env::temp_dir().join(format!("chartops-fetch-test-{}", std::process::id()));
        std::fs::write(&path, b"packages: []").unwrap();

        let data = fetch(&format!("file://{}", path.display())).await.unwrap();
        assert_eq!(data, b"packages: []");

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let result = fetch("file:///nonexistent/chartops/package.yaml").await;
        assert!(result.is_err());
    }
}
