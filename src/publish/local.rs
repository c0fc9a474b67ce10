use crate::publish::{ObjectStore, StoreError};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Writes files below a root directory.
///
/// Each file is written to a temporary file in the destination directory,
/// synced, then renamed over the final name, so readers never observe a
/// partially written file.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a store path (`/folder/name.epub`) onto the root directory,
    /// refusing anything that would escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut target = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => target.push(part),
                Component::CurDir => {}
                _ => return Err(StoreError::InvalidPath(path.to_string())),
            }
        }
        if target == self.root {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(target)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        let target = self.resolve(path)?;
        let written = target.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
            .await
            .map_err(std::io::Error::other)??;

        tracing::debug!(path = %written.display(), "Wrote file");
        Ok(written.display().to_string())
    }
}

fn write_atomically(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = target.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
