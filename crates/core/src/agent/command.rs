//! Extractor CLI agent (yt-dlp compatible).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::process::Command;
use tracing::{debug, info};

use super::{last_line, AcquisitionAgent, AgentError, ByteSource};
use crate::config::CommandAgentConfig;

/// Longest stderr excerpt carried into an error.
const MAX_STDERR_EXCERPT: usize = 300;

/// Runs an external extractor into a private scratch directory.
///
/// The child is spawned with `kill_on_drop`, so dropping the fetch future
/// terminates it. The scratch directory travels with the returned
/// [`ByteSource`] and is removed once the stream is dropped.
pub struct CommandAgent {
    config: CommandAgentConfig,
    scratch_root: PathBuf,
}

impl CommandAgent {
    pub fn new(config: CommandAgentConfig, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            scratch_root: scratch_root.into(),
        }
    }

    /// Substitute placeholders and prepend the cookies option.
    fn build_args(&self, reference: &str, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        let mut args = Vec::with_capacity(self.config.args.len() + 2);

        if let Some(cookies) = &self.config.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args.extend(self.config.args.iter().map(|arg| {
            arg.replace("{output}", &output)
                .replace("{reference}", reference)
        }));
        args
    }
}

/// Map extractor stderr to a failure mode.
fn classify_stderr(stderr: &str) -> AgentError {
    let excerpt = last_line(stderr, MAX_STDERR_EXCERPT);
    let lower = stderr.to_lowercase();

    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&[
        "http error 404",
        "http error 410",
        "video unavailable",
        "unsupported url",
        "is not a valid url",
        "does not exist",
        "has been removed",
        "private video",
    ]) {
        AgentError::NotFound(excerpt)
    } else if any(&["http error 429", "too many requests", "rate limit"]) {
        AgentError::Throttled(excerpt)
    } else if any(&[
        "http error 403",
        "sign in to confirm",
        "not a bot",
        "captcha",
        "access denied",
    ]) {
        AgentError::Blocked(excerpt)
    } else if any(&["timed out", "timeout"]) {
        AgentError::Timeout(excerpt)
    } else {
        AgentError::Unknown(excerpt)
    }
}

/// The extractor may adjust the extension; take the expected file or the
/// only regular file it left behind.
async fn locate_output(dir: &Path, expected: &Path) -> Result<PathBuf, AgentError> {
    if fs::metadata(expected).await.is_ok_and(|m| m.is_file()) {
        return Ok(expected.to_path_buf());
    }

    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| AgentError::Unknown(format!("cannot list scratch dir: {}", e)))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AgentError::Unknown(format!("cannot list scratch dir: {}", e)))?
    {
        let path = entry.path();
        let is_partial = path
            .extension()
            .is_some_and(|ext| ext == "part" || ext == "ytdl");
        if !is_partial && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            return Ok(path);
        }
    }

    Err(AgentError::Unknown(
        "extractor exited successfully but produced no file".to_string(),
    ))
}

#[async_trait]
impl AcquisitionAgent for CommandAgent {
    fn name(&self) -> &str {
        "command"
    }

    async fn fetch(&self, reference: &str) -> Result<ByteSource, AgentError> {
        fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(|e| AgentError::Unknown(format!("cannot create scratch root: {}", e)))?;
        let scratch = tempfile::Builder::new()
            .prefix("agent-")
            .tempdir_in(&self.scratch_root)
            .map_err(|e| AgentError::Unknown(format!("cannot create scratch dir: {}", e)))?;

        let expected = scratch.path().join("artifact.mp4");
        let args = self.build_args(reference, &expected);
        debug!(program = %self.config.program, "Spawning extractor");

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AgentError::Unknown(format!(
                        "extractor program not found: {}",
                        self.config.program
                    ))
                } else {
                    AgentError::Unknown(format!("failed to spawn extractor: {}", e))
                }
            })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::Unknown(format!("extractor wait failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(&stderr));
        }

        let path = locate_output(scratch.path(), &expected).await?;
        let file = File::open(&path)
            .await
            .map_err(|e| AgentError::Unknown(format!("cannot open extractor output: {}", e)))?;
        let len = file.metadata().await.ok().map(|m| m.len());

        info!(bytes = len.unwrap_or(0), "Extractor finished");
        Ok(ByteSource::from_file(file, len, scratch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn agent(program: &str, args: &[&str], root: &Path) -> CommandAgent {
        CommandAgent::new(
            CommandAgentConfig {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                cookies_file: None,
            },
            root,
        )
    }

    #[test]
    fn test_build_args_substitutes_placeholders() {
        let mut config = CommandAgentConfig::default();
        config.cookies_file = Some(PathBuf::from("/tmp/cookies.txt"));
        let agent = CommandAgent::new(config, "/tmp");

        let args = agent.build_args("https://example.com/watch?v=abc", Path::new("/s/out.mp4"));
        assert_eq!(&args[..2], &["--cookies", "/tmp/cookies.txt"]);
        assert!(args.contains(&"/s/out.mp4".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.com/watch?v=abc");
        assert!(!args.iter().any(|a| a.contains('{')));
    }

    #[test]
    fn test_classify_stderr() {
        assert!(matches!(
            classify_stderr("ERROR: [youtube] abc: Video unavailable"),
            AgentError::NotFound(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: unable to download: HTTP Error 429: Too Many Requests"),
            AgentError::Throttled(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: Sign in to confirm you're not a bot"),
            AgentError::Blocked(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: The read operation timed out"),
            AgentError::Timeout(_)
        ));
        assert!(matches!(classify_stderr("segfault"), AgentError::Unknown(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_streams_output_and_cleans_scratch() {
        let root = tempfile::tempdir().unwrap();
        let agent = agent("sh", &["-c", "printf 'hello' > \"$0\"", "{output}"], root.path());

        let mut source = agent.fetch("video-A").await.unwrap();
        assert_eq!(source.content_length, Some(5));

        let mut bytes = Vec::new();
        while let Some(chunk) = source.chunks.next().await {
            bytes.extend(chunk.unwrap());
        }
        assert_eq!(bytes, b"hello");

        drop(source);
        let leftover = std::fs::read_dir(root.path()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_failure_is_classified_and_cleaned() {
        let root = tempfile::tempdir().unwrap();
        let agent = agent(
            "sh",
            &["-c", "echo 'ERROR: HTTP Error 429: Too Many Requests' >&2; exit 1"],
            root.path(),
        );

        let err = agent.fetch("video-A").await.unwrap_err();
        assert!(matches!(err, AgentError::Throttled(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let root = tempfile::tempdir().unwrap();
        let agent = agent("definitely-not-a-real-extractor", &[], root.path());

        let err = agent.fetch("video-A").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_fetch_returns_promptly() {
        let root = tempfile::tempdir().unwrap();
        let agent = agent("sleep", &["30"], root.path());

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_millis(200), agent.fetch("x")).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
