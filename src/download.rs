use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Minimum interval between progress callbacks while streaming.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Shared HTTP client settings. Only connecting is bounded; transfers of
/// multi-hundred-megabyte images may legitimately run long.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("rocqup/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Error::from)
}

/// Streams `url` into `dest_dir`, reporting `(bytes_downloaded, total)`
/// through `on_progress` at most every 200 ms. The last call is always made
/// after the final byte and carries a known total equal to the bytes
/// written, so consumers see exactly one 100% report per download.
pub async fn download(
    url: &str,
    dest_dir: &Path,
    mut on_progress: impl FnMut(u64, Option<u64>),
) -> Result<PathBuf> {
    let file_name = file_name_from_url(url);
    let local_path = dest_dir.join(file_name);
    tracing::info!("Downloading {}...", file_name);

    let response = http_client()?.get(url).send().await?;
    if !response.status().is_success() {
        return Err(Error::Download(format!(
            "HTTP {} fetching {}",
            response.status().as_u16(),
            url
        )));
    }
    let total = response.content_length().filter(|len| *len > 0);

    let mut file = fs::File::create(&local_path)?;
    let mut downloaded = 0u64;
    let mut last_report: Option<Instant> = None;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;

        let due = last_report.map_or(true, |at| at.elapsed() >= PROGRESS_INTERVAL);
        let done = total.is_some_and(|len| downloaded >= len);
        if due && !done {
            on_progress(downloaded, total);
            last_report = Some(Instant::now());
        }
    }

    on_progress(downloaded, Some(downloaded));
    tracing::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
    Ok(local_path)
}

fn file_name_from_url(url: &str) -> &str {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("download.bin")
}

/// Verifies a file against an expected hex digest. An empty digest skips
/// verification, which is how unsigned channels are published.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let expected = expected.trim();
    if expected.is_empty() {
        tracing::debug!("No checksum pinned for {}, skipping", path.display());
        return Ok(());
    }

    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::Checksum {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    tracing::debug!("Checksum OK for {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_response(status_line: &'static str, body: Vec<u8>) -> String {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let header = format!(
                    "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{}/artifact.bin", addr)
    }

    #[test]
    fn empty_checksum_skips_verification() {
        // The file is never opened, so a missing path passes too.
        assert!(verify_sha256(Path::new("/nonexistent"), "").is_ok());
        assert!(verify_sha256(Path::new("/nonexistent"), "  \n").is_ok());
    }

    #[test]
    fn checksum_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        fs::write(&path, b"rocq platform").unwrap();
        let digest = hex::encode(Sha256::digest(b"rocq platform"));
        assert!(verify_sha256(&path, &digest).is_ok());
        assert!(verify_sha256(&path, &digest.to_uppercase()).is_ok());
    }

    #[test]
    fn checksum_mismatch_reports_both_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        fs::write(&path, b"rocq platform").unwrap();
        let err = verify_sha256(&path, &"0".repeat(64)).unwrap_err();
        match err {
            Error::Checksum {
                expected, actual, ..
            } => {
                assert_eq!(expected, "0".repeat(64));
                assert_eq!(actual, hex::encode(Sha256::digest(b"rocq platform")));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn url_file_names() {
        assert_eq!(file_name_from_url("https://x/y/tool.dmg"), "tool.dmg");
        assert_eq!(file_name_from_url("https://x/y/tool.exe?token=1"), "tool.exe");
        assert_eq!(file_name_from_url("https://x/y/"), "download.bin");
    }

    #[tokio::test]
    async fn download_reports_one_final_total() {
        let body: Vec<u8> = vec![7u8; 100_000];
        let url = serve_response("HTTP/1.1 200 OK", body.clone());
        let dir = tempfile::tempdir().unwrap();

        let mut calls: Vec<(u64, Option<u64>)> = Vec::new();
        let path = download(&url, dir.path(), |done, total| calls.push((done, total)))
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "artifact.bin");
        assert_eq!(fs::read(&path).unwrap(), body);

        let last = calls.last().copied().unwrap();
        assert_eq!(last, (body.len() as u64, Some(body.len() as u64)));
        let full_reports = calls
            .iter()
            .filter(|(done, total)| *total == Some(*done))
            .count();
        assert_eq!(full_reports, 1, "exactly one 100% report: {:?}", calls);
    }

    #[tokio::test]
    async fn http_error_status_is_a_download_error() {
        let url = serve_response("HTTP/1.1 404 Not Found", Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let err = download(&url, dir.path(), |_, _| {}).await.unwrap_err();
        assert!(matches!(err, Error::Download(_)), "got {:?}", err);
        assert!(err.to_string().contains("404"));
    }
}
