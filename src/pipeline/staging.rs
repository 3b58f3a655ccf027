use crate::common::error::{EtlError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-run JSON hand-off between steps: `<root>/<run_id>/<key>.json`
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, run_id: &str, key: &str) -> PathBuf {
        // run ids may carry ':' and '+' from timestamps
        let run_dir: String = run_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
            .collect();
        self.root.join(run_dir).join(format!("{key}.json"))
    }

    pub async fn put<T: Serialize + ?Sized>(&self, run_id: &str, key: &str, value: &T) -> Result<PathBuf> {
        let path = self.path_for(run_id, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Staged {} ({} bytes) at {}", key, bytes.len(), path.display());
        Ok(path)
    }

    pub async fn get<T: DeserializeOwned>(&self, run_id: &str, key: &str) -> Result<T> {
        let path = self.path_for(run_id, key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EtlError::StagingMissing {
                    run_id: run_id.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn contains(&self, run_id: &str, key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(run_id, key))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get_and_missing_keys() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());
        let run_id = "scheduled__2024-01-01T00:00:00+00:00";

        staging.put(run_id, "numbers", &vec![1, 2, 3]).await.unwrap();
        assert!(staging.contains(run_id, "numbers").await);
        let back: Vec<i32> = staging.get(run_id, "numbers").await.unwrap();
        assert_eq!(back, vec![1, 2, 3]);

        let missing = staging.get::<Vec<i32>>(run_id, "other").await.unwrap_err();
        assert!(matches!(missing, EtlError::StagingMissing { .. }));
        assert!(!staging
            .path_for(run_id, "numbers")
            .to_string_lossy()
            .contains(':'));
    }
}
