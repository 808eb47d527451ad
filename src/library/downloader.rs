/// Download Service seam and the JIT deadline race
///
/// A JIT fetch runs as a spawned task raced against a deadline; when the
/// deadline fires the task is aborted so a stuck downloader can never stall
/// block assembly beyond the configured bound.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub success: bool,
    pub output: Option<String>,
}

#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Locate and fetch an audio file into `output_folder`. Expected to
    /// finish well under the caller's deadline for fast cases, but may
    /// legitimately exceed it.
    async fn fetch(
        &self,
        artist: &str,
        title: &str,
        output_folder: &str,
        quality: &str,
    ) -> Result<DownloadOutcome, String>;
}

/// Race a fetch against `deadline`. Returns true only when the service
/// reported success in time; timeouts abort the task.
pub async fn download_with_deadline(
    service: &Arc<dyn DownloadService>,
    artist: &str,
    title: &str,
    output_folder: &str,
    quality: &str,
    deadline: Duration,
) -> bool {
    let service = service.clone();
    let artist_owned = artist.to_string();
    let title_owned = title.to_string();
    let folder = output_folder.to_string();
    let quality = quality.to_string();

    let mut handle = tokio::spawn(async move {
        service
            .fetch(&artist_owned, &title_owned, &folder, &quality)
            .await
    });

    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(Ok(outcome))) => {
            if !outcome.success {
                log::info!("download did not complete for '{artist} - {title}'");
            }
            outcome.success
        }
        Ok(Ok(Err(e))) => {
            log::warn!("download failed for '{artist} - {title}': {e}");
            false
        }
        Ok(Err(e)) => {
            log::warn!("download task died for '{artist} - {title}': {e}");
            false
        }
        Err(_) => {
            // Don't orphan the worker once the deadline fires.
            handle.abort();
            log::info!(
                "download deadline ({:?}) hit for '{artist} - {title}'",
                deadline
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowDownloader {
        delay: Duration,
        succeed: bool,
    }

    #[async_trait]
    impl DownloadService for SlowDownloader {
        async fn fetch(
            &self,
            _artist: &str,
            _title: &str,
            _output_folder: &str,
            _quality: &str,
        ) -> Result<DownloadOutcome, String> {
            tokio::time::sleep(self.delay).await;
            if self.succeed {
                Ok(DownloadOutcome {
                    success: true,
                    output: Some("out.mp3".to_string()),
                })
            } else {
                Err("source unreachable".to_string())
            }
        }
    }

    #[tokio::test]
    async fn fast_success_wins_the_race() {
        let svc: Arc<dyn DownloadService> = Arc::new(SlowDownloader {
            delay: Duration::from_millis(5),
            succeed: true,
        });
        assert!(
            download_with_deadline(&svc, "A", "T", "/music", "high", Duration::from_secs(2))
                .await
        );
    }

    #[tokio::test]
    async fn deadline_beats_a_stuck_fetch() {
        let svc: Arc<dyn DownloadService> = Arc::new(SlowDownloader {
            delay: Duration::from_secs(30),
            succeed: true,
        });
        let started = std::time::Instant::now();
        let ok = download_with_deadline(
            &svc,
            "A",
            "T",
            "/music",
            "high",
            Duration::from_millis(50),
        )
        .await;
        assert!(!ok);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn fetch_errors_are_caught() {
        let svc: Arc<dyn DownloadService> = Arc::new(SlowDownloader {
            delay: Duration::from_millis(1),
            succeed: false,
        });
        assert!(
            !download_with_deadline(&svc, "A", "T", "/music", "high", Duration::from_secs(1))
                .await
        );
    }
}
