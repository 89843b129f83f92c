//! Resilient media acquisition.
//!
//! The source is adversarial: formats come and go, and aggressive clients
//! get throttled or blocked. One logical "download the audio" request is
//! therefore a bounded walk over a (format preference × identity profile)
//! attempt matrix — most-likely-to-succeed combinations first — with a
//! per-attempt timeout, spacing between attempts, and a minimum-size check
//! on whatever the fetch tool produces. The first valid asset wins;
//! exhaustion is classified so callers can tell "retry later" from "will
//! never work".

use crate::error::FailureKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const MEDIA_EXTENSIONS: [&str; 5] = ["m4a", "webm", "mp3", "mp4", "wav"];

/// One identity the fetch tool can present to the source.
#[derive(Debug, Clone)]
pub struct IdentityProfile {
    pub label: String,
    pub user_agent: String,
    /// Extractor player client override (e.g. "android"); `None` keeps
    /// the tool's default web client.
    pub player_client: Option<String>,
}

/// Attempt-matrix parameters.
#[derive(Debug, Clone)]
pub struct AcquirePolicy {
    /// Format selectors in preference order.
    pub formats: Vec<String>,
    /// Identity profiles in preference order.
    pub identities: Vec<IdentityProfile>,
    /// Hard cap on total attempts, whatever the matrix size.
    pub max_attempts: usize,
    pub attempt_timeout: Duration,
    /// Pause between attempts so the walk itself doesn't trip rate limits.
    pub attempt_spacing: Duration,
    /// Anything smaller is an error page or a stub, not media.
    pub min_media_bytes: u64,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            formats: vec![
                "bestaudio/best[height<=480]/worst".to_string(),
                "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio".to_string(),
                "best[height<=360]/worst".to_string(),
                "worst".to_string(),
            ],
            identities: vec![
                IdentityProfile {
                    label: "desktop".to_string(),
                    user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                                 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                        .to_string(),
                    player_client: None,
                },
                IdentityProfile {
                    label: "android".to_string(),
                    user_agent: "com.google.android.youtube/19.09.37 (Linux; U; Android 14) gzip"
                        .to_string(),
                    player_client: Some("android".to_string()),
                },
                IdentityProfile {
                    label: "ios".to_string(),
                    user_agent:
                        "com.google.ios.youtube/19.09.3 (iPhone16,2; U; CPU iOS 17_4 like Mac OS X)"
                            .to_string(),
                    player_client: Some("ios".to_string()),
                },
            ],
            max_attempts: 15,
            attempt_timeout: Duration::from_secs(120),
            attempt_spacing: Duration::from_secs(2),
            min_media_bytes: 16 * 1024,
        }
    }
}

/// Parameters for a single fetch attempt.
pub struct FetchRequest<'a> {
    pub video_id: &'a str,
    pub url: &'a str,
    pub format: &'a str,
    pub identity: &'a IdentityProfile,
    pub output_dir: &'a Path,
    pub timeout: Duration,
}

/// The external fetch tool, behind a seam so tests can swap it out.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Run one attempt. `Ok` returns the downloaded file's path; the
    /// caller still validates it.
    async fn fetch(&self, req: &FetchRequest<'_>) -> Result<PathBuf, String>;
}

/// Classified acquisition failure after the matrix is exhausted.
#[derive(Debug, Clone)]
pub struct AcquireError {
    pub kind: FailureKind,
    pub message: String,
}

/// Walk the attempt matrix until a valid asset lands or attempts run out.
pub async fn acquire_media(
    source: &dyn MediaSource,
    policy: &AcquirePolicy,
    video_id: &str,
    scratch_dir: &Path,
) -> Result<PathBuf, AcquireError> {
    let url = format!("https://www.youtube.com/watch?v={}", video_id);
    let mut attempts = 0usize;
    let mut saw_restricted = false;
    let mut saw_rate_limited = false;
    let mut last_error = "no attempts were made".to_string();

    'matrix: for identity in &policy.identities {
        for format in &policy.formats {
            if attempts >= policy.max_attempts {
                break 'matrix;
            }
            if attempts > 0 && !policy.attempt_spacing.is_zero() {
                tokio::time::sleep(policy.attempt_spacing).await;
            }
            attempts += 1;

            let req = FetchRequest {
                video_id,
                url: &url,
                format,
                identity,
                output_dir: scratch_dir,
                timeout: policy.attempt_timeout,
            };

            match source.fetch(&req).await {
                Ok(path) => {
                    let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                    if size >= policy.min_media_bytes {
                        log::info!(
                            "Acquired {} on attempt {} ({} / {}): {} bytes",
                            video_id,
                            attempts,
                            format,
                            identity.label,
                            size
                        );
                        return Ok(path);
                    }
                    // Stub download: the tool "succeeded" but the asset
                    // is unusable. Treat as a failed attempt and move on.
                    log::warn!(
                        "Attempt {} for {} produced a {}-byte file, discarding",
                        attempts,
                        video_id,
                        size
                    );
                    let _ = tokio::fs::remove_file(&path).await;
                    last_error = format!("downloaded file too small ({} bytes)", size);
                }
                Err(e) => {
                    match classify_fetch_error(&e) {
                        FailureKind::Restricted => saw_restricted = true,
                        FailureKind::RateLimited => saw_rate_limited = true,
                        _ => {}
                    }
                    log::warn!(
                        "Fetch attempt {} for {} ({} / {}) failed: {}",
                        attempts,
                        video_id,
                        format,
                        identity.label,
                        e
                    );
                    last_error = e;
                }
            }
        }
    }

    // Most actionable classification wins: a restricted marker means
    // retrying is pointless, rate limiting means wait and retry.
    let kind = if saw_restricted {
        FailureKind::Restricted
    } else if saw_rate_limited {
        FailureKind::RateLimited
    } else {
        FailureKind::Generic
    };

    Err(AcquireError {
        kind,
        message: format!(
            "all {} download attempts failed, last error: {}",
            attempts, last_error
        ),
    })
}

/// Map a single attempt's error text onto the failure taxonomy.
pub fn classify_fetch_error(message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    const RESTRICTED_MARKERS: [&str; 6] = [
        "sign in",
        "restricted",
        "confirm your age",
        "private",
        "not available in your country",
        "members only",
    ];
    const RATE_MARKERS: [&str; 4] = ["429", "rate limit", "too many requests", "throttl"];

    if RESTRICTED_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::Restricted
    } else if RATE_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::RateLimited
    } else {
        FailureKind::Generic
    }
}

/// Remove leftover media for other keys from the scratch directory.
/// Downloads for unrelated videos must never feed a transcription.
pub fn sweep_scratch(scratch_dir: &Path, keep_video_id: &str) {
    let keep_prefix = format!("{}.", keep_video_id);
    let entries = match std::fs::read_dir(scratch_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_media = MEDIA_EXTENSIONS.iter().any(|ext| name.ends_with(&format!(".{}", ext)));
        if is_media && !name.starts_with(&keep_prefix) {
            log::info!("Cleaning up leftover media file: {}", name);
            if let Err(e) = std::fs::remove_file(entry.path()) {
                log::warn!("Could not remove {}: {}", name, e);
            }
        }
    }
}

/// Default `MediaSource`: shells out to yt-dlp (or a compatible tool).
pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl MediaSource for YtDlpFetcher {
    async fn fetch(&self, req: &FetchRequest<'_>) -> Result<PathBuf, String> {
        tokio::fs::create_dir_all(req.output_dir)
            .await
            .map_err(|e| format!("failed to create media directory: {}", e))?;

        let template = req.output_dir.join(format!("{}.%(ext)s", req.video_id));

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--format")
            .arg(req.format)
            .arg("--user-agent")
            .arg(&req.identity.user_agent)
            .arg("--output")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--http-chunk-size")
            .arg("10M")
            .arg("--socket-timeout")
            .arg("30");
        if let Some(client) = &req.identity.player_client {
            cmd.arg("--extractor-args")
                .arg(format!("youtube:player_client={}", client));
        }
        cmd.arg(req.url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // The per-attempt timeout drops the future; take the process
            // down with it
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.binary.display(), e))?;

        let output = tokio::time::timeout(req.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("fetch attempt timed out after {}s", req.timeout.as_secs()))?
            .map_err(|e| format!("failed to run fetch tool: {}", e))?;

        if !output.status.success() {
            return Err(stderr_tail(&output.stderr, output.status.code()));
        }

        find_media_file(req.output_dir, req.video_id)
            .ok_or_else(|| "fetch tool reported success but produced no file".to_string())
    }
}

/// The tool prints one ERROR line at the end; that is the useful part.
fn stderr_tail(stderr: &[u8], status_code: Option<i32>) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| format!("fetch tool exited with status {:?}", status_code))
}

/// Locate the downloaded file: the tool picks the extension, we know the
/// stem.
fn find_media_file(dir: &Path, video_id: &str) -> Option<PathBuf> {
    let prefix = format!("{}.", video_id);
    std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .find(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(&prefix)
        })
        .map(|entry| entry.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted fetch double that records every attempt it sees.
    struct ScriptedSource {
        script: Mutex<Vec<Result<Vec<u8>, String>>>,
        attempts: Mutex<Vec<(String, String)>>,
        dir: PathBuf,
    }

    impl ScriptedSource {
        fn new(dir: &Path, script: Vec<Result<Vec<u8>, String>>) -> Self {
            Self {
                script: Mutex::new(script),
                attempts: Mutex::new(Vec::new()),
                dir: dir.to_path_buf(),
            }
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MediaSource for ScriptedSource {
        async fn fetch(&self, req: &FetchRequest<'_>) -> Result<PathBuf, String> {
            self.attempts
                .lock()
                .unwrap()
                .push((req.format.to_string(), req.identity.label.clone()));

            let mut script = self.script.lock().unwrap();
            let step = if script.is_empty() {
                Err("scripted failure".to_string())
            } else {
                script.remove(0)
            };

            match step {
                Ok(bytes) => {
                    let path = self.dir.join(format!("{}.m4a", req.video_id));
                    std::fs::write(&path, bytes).unwrap();
                    Ok(path)
                }
                Err(e) => Err(e),
            }
        }
    }

    fn test_policy(formats: usize, identities: usize, max_attempts: usize) -> AcquirePolicy {
        AcquirePolicy {
            formats: (0..formats).map(|i| format!("format-{}", i)).collect(),
            identities: (0..identities)
                .map(|i| IdentityProfile {
                    label: format!("identity-{}", i),
                    user_agent: "test-agent".to_string(),
                    player_client: None,
                })
                .collect(),
            max_attempts,
            attempt_timeout: Duration::from_secs(5),
            attempt_spacing: Duration::ZERO,
            min_media_bytes: 64,
        }
    }

    #[tokio::test]
    async fn test_always_failing_source_terminates_after_full_matrix() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::new(temp.path(), vec![]);
        let policy = test_policy(3, 2, 15);

        let err = acquire_media(&source, &policy, "vid", temp.path())
            .await
            .unwrap_err();

        assert_eq!(source.attempt_count(), 6);
        assert_eq!(err.kind, FailureKind::Generic);
    }

    #[tokio::test]
    async fn test_attempt_cap_bounds_a_large_matrix() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::new(temp.path(), vec![]);
        let policy = test_policy(10, 10, 4);

        let _ = acquire_media(&source, &policy, "vid", temp.path()).await;
        assert_eq!(source.attempt_count(), 4);
    }

    #[tokio::test]
    async fn test_uniform_restricted_failures_classify_as_restricted() {
        let temp = TempDir::new().unwrap();
        let script = (0..6)
            .map(|_| Err("ERROR: access restricted".to_string()))
            .collect();
        let source = ScriptedSource::new(temp.path(), script);
        let policy = test_policy(3, 2, 15);

        let err = acquire_media(&source, &policy, "vid", temp.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Restricted);
    }

    #[tokio::test]
    async fn test_restricted_outranks_rate_limited() {
        let temp = TempDir::new().unwrap();
        let script = vec![
            Err("HTTP Error 429: Too Many Requests".to_string()),
            Err("Sign in to confirm your age".to_string()),
        ];
        let source = ScriptedSource::new(temp.path(), script);
        let policy = test_policy(2, 1, 15);

        let err = acquire_media(&source, &policy, "vid", temp.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Restricted);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::new(temp.path(), vec![Ok(vec![0u8; 1024])]);
        let policy = test_policy(3, 2, 15);

        let path = acquire_media(&source, &policy, "vid", temp.path())
            .await
            .unwrap();

        assert_eq!(source.attempt_count(), 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_tiny_file_is_an_invisible_failure() {
        let temp = TempDir::new().unwrap();
        // First attempt "succeeds" with a stub, second delivers real media
        let source =
            ScriptedSource::new(temp.path(), vec![Ok(vec![0u8; 10]), Ok(vec![0u8; 1024])]);
        let policy = test_policy(3, 2, 15);

        let path = acquire_media(&source, &policy, "vid", temp.path())
            .await
            .unwrap();

        assert_eq!(source.attempt_count(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_matrix_order_rotates_formats_under_one_identity_first() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::new(temp.path(), vec![]);
        let policy = test_policy(2, 2, 15);

        let _ = acquire_media(&source, &policy, "vid", temp.path()).await;

        let attempts = source.attempts.lock().unwrap();
        let order: Vec<(String, String)> = attempts.clone();
        assert_eq!(
            order,
            vec![
                ("format-0".to_string(), "identity-0".to_string()),
                ("format-1".to_string(), "identity-0".to_string()),
                ("format-0".to_string(), "identity-1".to_string()),
                ("format-1".to_string(), "identity-1".to_string()),
            ]
        );
    }

    #[test]
    fn test_classification_markers() {
        assert_eq!(
            classify_fetch_error("ERROR: Sign in to confirm you're not a bot"),
            FailureKind::Restricted
        );
        assert_eq!(
            classify_fetch_error("ERROR: Private video"),
            FailureKind::Restricted
        );
        assert_eq!(
            classify_fetch_error("HTTP Error 429"),
            FailureKind::RateLimited
        );
        assert_eq!(
            classify_fetch_error("connection reset by peer"),
            FailureKind::Generic
        );
    }

    #[test]
    fn test_sweep_scratch_keeps_current_key() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("current.m4a"), b"keep").unwrap();
        std::fs::write(temp.path().join("stale.webm"), b"drop").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"not media").unwrap();

        sweep_scratch(temp.path(), "current");

        assert!(temp.path().join("current.m4a").exists());
        assert!(!temp.path().join("stale.webm").exists());
        assert!(temp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_default_policy_fits_the_attempt_cap() {
        let policy = AcquirePolicy::default();
        assert!(policy.formats.len() * policy.identities.len() <= policy.max_attempts);
    }
}
