use super::{DocumentStore, UpsertOutcome};
use crate::common::error::{EtlError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// JSON document collections on the filesystem.
///
/// Layout: `<root>/<collection>/<sha256(_id)>.json`, one file per document.
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(EtlError::Storage(format!("invalid collection name '{collection}'")));
        }
        Ok(self.root.join(collection))
    }

    pub fn document_path(&self, collection: &str, id: &str) -> Result<PathBuf> {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        let name = format!("{}.json", hex::encode(hasher.finalize()));
        Ok(self.collection_dir(collection)?.join(name))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<UpsertOutcome> {
        let path = self.document_path(collection, id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existed = tokio::fs::try_exists(&path).await?;

        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Wrote document {} to {}", id, path.display());

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self.find_all(collection).await?.len() as u64)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Value>> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            docs.push(serde_json::from_slice::<Value>(&bytes)?);
        }
        docs.sort_by(|a, b| {
            let ka = a.get("_id").and_then(Value::as_str).unwrap_or_default();
            let kb = b.get("_id").and_then(Value::as_str).unwrap_or_default();
            ka.cmp(kb)
        });
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upsert_replaces_by_id_and_lists_sorted() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path());

        let outcome = store.upsert("meetings", "b", &json!({"_id": "b", "v": 1})).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        store.upsert("meetings", "a", &json!({"_id": "a"})).await.unwrap();
        let outcome = store.upsert("meetings", "b", &json!({"_id": "b", "v": 2})).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let docs = store.find_all("meetings").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["_id"], "a");
        assert_eq!(docs[1]["v"], 2);
        assert_eq!(store.count("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_path_like_collection_names() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path());
        let err = store.upsert("../escape", "a", &json!({})).await.unwrap_err();
        assert!(matches!(err, EtlError::Storage(_)));
    }
}
