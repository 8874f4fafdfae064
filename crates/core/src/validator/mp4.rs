//! Size and ISO-BMFF (mp4) container checks.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::{ArtifactValidator, ValidationResult};
use crate::config::{ContainerKind, ValidatorConfig};

/// Upper bound on top-level boxes walked before giving up.
const MAX_TOP_LEVEL_BOXES: usize = 4096;

/// Validates artifacts by size and, for mp4, by walking the top-level boxes.
///
/// The walk catches the common failure shapes of scraped media: HTML error
/// pages saved as `.mp4` (no `ftyp`), truncated transfers (a box runs past
/// the end of the file) and unmuxed partial output (no `moov`).
#[derive(Debug, Clone)]
pub struct ContainerValidator {
    config: ValidatorConfig,
}

impl ContainerValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    async fn check_mp4(&self, path: &Path, len: u64) -> ValidationResult {
        let mut file = match File::open(path).await {
            Ok(f) => f,
            Err(e) => return ValidationResult::fail(format!("cannot open artifact: {}", e)),
        };

        let mut offset = 0u64;
        let mut moov_index = None;
        let mut mdat_index = None;

        for index in 0..MAX_TOP_LEVEL_BOXES {
            if offset == len {
                break;
            }
            if len - offset < 8 {
                return ValidationResult::fail(format!(
                    "{} stray bytes after last box",
                    len - offset
                ));
            }

            let (kind, size) = match read_box_header(&mut file, offset, len).await {
                Ok(header) => header,
                Err(reason) => return ValidationResult::fail(reason),
            };

            if index == 0 && &kind != b"ftyp" {
                return ValidationResult::fail("missing ftyp header, not an mp4 container");
            }
            if size > len - offset {
                return ValidationResult::fail(format!(
                    "box '{}' at offset {} overruns end of file (truncated download)",
                    String::from_utf8_lossy(&kind),
                    offset
                ));
            }

            match &kind {
                b"moov" => moov_index = moov_index.or(Some(index)),
                b"mdat" => mdat_index = mdat_index.or(Some(index)),
                _ => {}
            }

            offset += size;
        }

        if offset != len {
            return ValidationResult::fail("too many top-level boxes");
        }

        let Some(moov) = moov_index else {
            return ValidationResult::fail("no moov box, container index is missing");
        };

        if self.config.require_faststart {
            if let Some(mdat) = mdat_index {
                if mdat < moov {
                    return ValidationResult::fail("moov box follows media data (not faststart)");
                }
            }
        }

        ValidationResult::pass()
    }
}

/// Reads the box at `offset`, returning its type and total size.
async fn read_box_header(file: &mut File, offset: u64, len: u64) -> Result<([u8; 4], u64), String> {
    let mut header = [0u8; 8];
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| format!("read error: {}", e))?;
    file.read_exact(&mut header)
        .await
        .map_err(|e| format!("read error: {}", e))?;

    let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let kind = [header[4], header[5], header[6], header[7]];

    if !kind.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(format!("garbage box type at offset {}", offset));
    }

    let (size, header_len) = match size32 {
        // Box extends to end of file.
        0 => (len - offset, 8),
        1 => {
            let mut large = [0u8; 8];
            file.read_exact(&mut large)
                .await
                .map_err(|e| format!("read error: {}", e))?;
            (u64::from_be_bytes(large), 16)
        }
        n => (n as u64, 8),
    };

    if size < header_len {
        return Err(format!(
            "box '{}' at offset {} has invalid size {}",
            String::from_utf8_lossy(&kind),
            offset,
            size
        ));
    }

    Ok((kind, size))
}

#[async_trait]
impl ArtifactValidator for ContainerValidator {
    fn name(&self) -> &str {
        "container"
    }

    async fn validate(&self, path: &Path) -> ValidationResult {
        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => return ValidationResult::fail(format!("cannot stat artifact: {}", e)),
        };

        if !metadata.is_file() {
            return ValidationResult::fail("artifact is not a regular file");
        }

        let len = metadata.len();
        if len < self.config.min_artifact_bytes {
            return ValidationResult::fail(format!(
                "artifact is {} bytes, below minimum of {}",
                len, self.config.min_artifact_bytes
            ));
        }

        let result = match self.config.container {
            ContainerKind::Any => ValidationResult::pass(),
            ContainerKind::Mp4 => self.check_mp4(path, len).await,
        };

        debug!(path = %path.display(), ok = result.ok, reason = %result.reason, "validated artifact");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn validator(min: u64) -> ContainerValidator {
        ContainerValidator::new(ValidatorConfig {
            min_artifact_bytes: min,
            ..Default::default()
        })
    }

    async fn write(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_valid_mp4_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "ok.mp4", &fixtures::mp4_bytes(4096)).await;

        let result = validator(1024).validate(&path).await;
        assert!(result.ok, "unexpected failure: {}", result.reason);
        assert!(result.reason.is_empty());
    }

    #[tokio::test]
    async fn test_small_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "tiny.mp4", &[0u8; 10]).await;

        let result = validator(1024).validate(&path).await;
        assert!(!result.ok);
        assert!(result.reason.contains("below minimum"));
    }

    #[tokio::test]
    async fn test_html_error_page_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = b"<!DOCTYPE html><html><body>Sign in to confirm</body></html>".to_vec();
        page.resize(4096, b' ');
        let path = write(&dir, "page.mp4", &page).await;

        let result = validator(1024).validate(&path).await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn test_truncated_mp4_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = fixtures::mp4_bytes(8192);
        bytes.truncate(6000);
        let path = write(&dir, "cut.mp4", &bytes).await;

        let result = validator(1024).validate(&path).await;
        assert!(!result.ok);
        assert!(result.reason.contains("overruns"), "{}", result.reason);
    }

    #[tokio::test]
    async fn test_missing_moov_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "nomoov.mp4", &fixtures::mp4_bytes_without_moov(4096)).await;

        let result = validator(1024).validate(&path).await;
        assert!(!result.ok);
        assert!(result.reason.contains("moov"));
    }

    #[tokio::test]
    async fn test_faststart_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "slow.mp4", &fixtures::mp4_bytes_moov_last(4096)).await;

        assert!(validator(1024).validate(&path).await.ok);

        let strict = ContainerValidator::new(ValidatorConfig {
            min_artifact_bytes: 1024,
            require_faststart: true,
            ..Default::default()
        });
        let result = strict.validate(&path).await;
        assert!(!result.ok);
        assert!(result.reason.contains("faststart"));
    }

    #[tokio::test]
    async fn test_any_container_only_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "blob.bin", &[7u8; 2048]).await;

        let v = ContainerValidator::new(ValidatorConfig {
            min_artifact_bytes: 1024,
            container: ContainerKind::Any,
            require_faststart: false,
        });
        assert!(v.validate(&path).await.ok);
    }

    #[tokio::test]
    async fn test_validation_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = fixtures::mp4_bytes(4096);
        let path = write(&dir, "keep.mp4", &bytes).await;

        validator(1024).validate(&path).await;
        assert_eq!(fs::read(&path).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_result_not_an_error() {
        let result = validator(1).validate(Path::new("/nonexistent/file.mp4")).await;
        assert!(!result.ok);
        assert!(result.reason.contains("cannot stat"));
    }
}
