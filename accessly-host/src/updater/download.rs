//! Streamed archive download with progress tracking

use crate::error::{KioskError, KioskResult};
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Progress information during download.
#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// Zero when the server sent no length.
    pub total: u64,
}

impl DownloadProgress {
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.downloaded as f32 / self.total as f32) * 100.0
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Download `url` to `dst`. The body goes to a sibling temp file first and
/// is renamed over `dst` only once complete.
pub async fn download<F>(
    client: &reqwest::Client,
    url: &str,
    dst: &Path,
    mut on_progress: F,
) -> KioskResult<u64>
where
    F: FnMut(DownloadProgress),
{
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(KioskError::Remote(format!("Download failed: {}", response.status())));
    }

    let total = response.content_length().unwrap_or(0);
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = dst.with_extension(format!("{}.part", uuid::Uuid::new_v4().simple()));
    debug!("Downloading {} to {}", url, part.display());

    let result = async {
        let mut file = tokio::fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        let mut last_logged = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let progress = DownloadProgress { downloaded, total };
            on_progress(progress);
            let decile = progress.percentage() as u64 / 10;
            if decile > last_logged {
                last_logged = decile;
                info!("Downloaded {} of {} ({:.0}%)", format_bytes(downloaded), format_bytes(total), progress.percentage());
            }
        }
        file.flush().await?;
        Ok::<_, KioskError>(downloaded)
    }
    .await;

    match result {
        Ok(downloaded) => {
            tokio::fs::rename(&part, dst).await?;
            info!("Download complete: {} ({})", dst.display(), format_bytes(downloaded));
            Ok(downloaded)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/NizamLab-0.5.0.zip", addr)
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
    }

    #[tokio::test]
    async fn test_download_writes_file_and_reports_progress() {
        let url = serve_once("200 OK", b"zip-bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("update.zip");

        let mut last = None;
        let size = download(&reqwest::Client::new(), &url, &dst, |p| last = Some(p))
            .await
            .unwrap();

        assert_eq!(size, 9);
        assert_eq!(std::fs::read(&dst).unwrap(), b"zip-bytes");
        let last = last.unwrap();
        assert_eq!(last.downloaded, 9);
        assert!((last.percentage() - 100.0).abs() < 0.01);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_http_error_leaves_no_file() {
        let url = serve_once("404 Not Found", b"").await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("update.zip");

        let err = download(&reqwest::Client::new(), &url, &dst, |_| {}).await.unwrap_err();
        assert!(matches!(err, KioskError::Remote(_)));
        assert!(!dst.exists());
    }
}
