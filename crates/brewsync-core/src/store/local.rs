//! Local-only fallback store: one file per collection on this device.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{ChangeCallback, RemoteStore, SubscriptionHandle};
use crate::models::{CollectionName, Payload};
use crate::{Error, Result};

const FILE_EXTENSION: &str = "payload";

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores each collection as `<data_dir>/<collection>.payload`.
///
/// There is no remote side, so subscriptions never fire.
#[derive(Debug, Clone)]
pub struct LocalStore {
    data_dir: PathBuf,
}

impl LocalStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, name: CollectionName) -> PathBuf {
        self.data_dir
            .join(format!("{}.{FILE_EXTENSION}", name.as_str()))
    }

    async fn write_atomically(&self, name: CollectionName, payload: &Payload) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let target = self.path_for(name);
        // Each write stages in its own file so concurrent writers never share one.
        let staging = target.with_extension(format!(
            "{FILE_EXTENSION}.{}.{}.tmp",
            std::process::id(),
            STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(error) = tokio::fs::write(&staging, payload.as_str()).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error);
        }
        tokio::fs::rename(&staging, &target).await
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn read(&self, name: CollectionName) -> Result<Payload> {
        match tokio::fs::read_to_string(self.path_for(name)).await {
            Ok(raw) => Ok(Payload::from(raw)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(name)),
            Err(error) => Err(error.into()),
        }
    }

    async fn write(&self, name: CollectionName, payload: &Payload) -> Result<()> {
        self.write_atomically(name, payload)
            .await
            .map_err(|error| Error::write_failed(name, error))
    }

    async fn subscribe(
        &self,
        name: CollectionName,
        _on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle> {
        tracing::debug!("Local store has no change feed for {}", name);
        Ok(SubscriptionHandle::inert(name))
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn fresh_directory_reads_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("never-created"));
        let result = store.read(CollectionName::Inventories).await;
        assert!(matches!(result, Err(Error::NotFound(CollectionName::Inventories))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn write_replaces_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store
            .write(CollectionName::Reservations, &Payload::from(r#"[{"table":4}]"#))
            .await
            .unwrap();
        store
            .write(CollectionName::Reservations, &Payload::from("[]"))
            .await
            .unwrap();

        assert_eq!(
            store.read(CollectionName::Reservations).await.unwrap(),
            Payload::from("[]")
        );
        assert!(dir.path().join("reservations.payload").exists());
        assert_eq!(staged_files(dir.path()), 0);
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_one_collection_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let payloads: Vec<String> = (0..16).map(|index| format!("[{index}]")).collect();

        let writes: Vec<_> = payloads
            .iter()
            .map(|text| {
                let store = store.clone();
                let payload = Payload::from(text.as_str());
                tokio::spawn(async move { store.write(CollectionName::Brews, &payload).await })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        let stored = store.read(CollectionName::Brews).await.unwrap();
        assert!(payloads.iter().any(|text| text == stored.as_str()));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscribe_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = store
            .subscribe(
                CollectionName::Brews,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        store
            .write(CollectionName::Brews, &Payload::from("{}"))
            .await
            .unwrap();

        assert!(!handle.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn write_into_unwritable_location_is_write_failed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = LocalStore::new(&blocker);

        let result = store.write(CollectionName::Brews, &Payload::from("{}")).await;
        assert!(matches!(
            result,
            Err(Error::WriteFailed {
                collection: CollectionName::Brews,
                ..
            })
        ));
    }
}
