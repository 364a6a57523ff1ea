//! Master key acquisition.
//!
//! The key is produced once at bootstrap by an external trusted program
//! (the "key receiver"). Its complete stdout is the key material, taken
//! verbatim. The resulting [`MasterKey`] is shared by `Arc` with the
//! credential store and never mutated afterwards.

use crate::error::{RegistryError, Result};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

pub mod config;

pub use config::{KeyConfig, KeyFailurePolicy};

/// Raw master key material.
///
/// Never logged (`Debug` prints only the length) and never serialized.
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Placeholder key used only in degraded mode.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey({} bytes)", self.0.len())
    }
}

/// Runs the key receiver program.
pub struct KeyProvider {
    config: KeyConfig,
}

impl KeyProvider {
    pub fn new(config: KeyConfig) -> Self {
        Self { config }
    }

    /// Invokes the key receiver once and returns its stdout as the key.
    ///
    /// Spawn errors, non-zero exits and runs longer than
    /// `timeout_seconds` all fail with [`RegistryError::KeyAcquisition`].
    /// A timed-out child is killed. There is no retry.
    pub async fn acquire(&self) -> Result<MasterKey> {
        let (program, args) = self.config.command.split_first().ok_or_else(|| {
            RegistryError::KeyAcquisition("no key receiver command configured".to_string())
        })?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RegistryError::KeyAcquisition(format!("failed to start {}: {}", program, e))
            })?;

        let limit = Duration::from_secs(self.config.timeout_seconds);
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                RegistryError::KeyAcquisition(format!("failed to read output of {}: {}", program, e))
            })?,
            Err(_) => {
                return Err(RegistryError::KeyAcquisition(format!(
                    "{} did not finish within {}s",
                    program, self.config.timeout_seconds
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RegistryError::KeyAcquisition(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        info!(program = %program, bytes = output.stdout.len(), "Master key acquired");
        Ok(MasterKey::from_bytes(output.stdout))
    }
}

/// Acquires the master key and applies the configured failure policy.
///
/// With [`KeyFailurePolicy::Abort`] the acquisition error is returned and
/// startup should stop. With [`KeyFailurePolicy::Degraded`] the error is
/// logged and an empty key is returned; every later seal/open fails with
/// a crypto error.
pub async fn bootstrap_key(config: &KeyConfig) -> Result<Arc<MasterKey>> {
    match KeyProvider::new(config.clone()).acquire().await {
        Ok(key) => Ok(Arc::new(key)),
        Err(e) => match config.on_failure {
            KeyFailurePolicy::Abort => Err(e),
            KeyFailurePolicy::Degraded => {
                error!(
                    error = %e,
                    "Continuing in degraded mode with an empty master key; secret operations will fail"
                );
                Ok(Arc::new(MasterKey::empty()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn shell(script: &str, timeout_seconds: u64, on_failure: KeyFailurePolicy) -> KeyConfig {
        KeyConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_seconds,
            on_failure,
        }
    }

    #[tokio::test]
    async fn test_acquire_takes_stdout_verbatim() {
        let config = shell("printf 'key-material\\n'", 5, KeyFailurePolicy::Abort);
        let key = KeyProvider::new(config).acquire().await.unwrap();
        assert_eq!(key.as_bytes(), b"key-material\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let config = shell("echo boom >&2; exit 3", 5, KeyFailurePolicy::Abort);
        let err = KeyProvider::new(config).acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyAcquisition);
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let config = KeyConfig {
            command: vec!["/nonexistent/key-receiver".to_string()],
            ..KeyConfig::default()
        };
        let err = KeyProvider::new(config).acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyAcquisition);
    }

    #[tokio::test]
    async fn test_empty_command() {
        let config = KeyConfig {
            command: Vec::new(),
            ..KeyConfig::default()
        };
        let err = KeyProvider::new(config).acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyAcquisition);
    }

    #[tokio::test]
    async fn test_hang_is_bounded() {
        let config = shell("sleep 30", 1, KeyFailurePolicy::Abort);
        let started = std::time::Instant::now();
        let err = KeyProvider::new(config).acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyAcquisition);
        assert!(err.to_string().contains("did not finish"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_bootstrap_abort_propagates() {
        let config = shell("exit 1", 5, KeyFailurePolicy::Abort);
        let err = bootstrap_key(&config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyAcquisition);
    }

    #[tokio::test]
    async fn test_bootstrap_degraded_yields_empty_key() {
        let config = shell("exit 1", 5, KeyFailurePolicy::Degraded);
        let key = bootstrap_key(&config).await.unwrap();
        assert!(key.is_empty());
    }

    #[test]
    fn test_debug_hides_material() {
        let key = MasterKey::from_bytes(b"super-secret".to_vec());
        let rendered = format!("{:?}", key);
        assert_eq!(rendered, "MasterKey(12 bytes)");
    }
}
