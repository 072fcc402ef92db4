use std::{
    io::{Error, ErrorKind},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use sendgate_common::{internal, mail::TEMP_FILE_PREFIX};
use tokio::fs;

use super::{AttachmentStore, BlobReader};
use crate::{
    Result, SpoolError,
    path::{validate_blob_name, validate_root},
};


/// Directory-backed attachment store
///
/// A blob named `<id>/<filename>` lives at `<root>/<id>/<filename>`.
///
/// # Atomicity
/// Writes go to a `.tmp_` sibling first and are renamed into place, so a
/// reader never observes a partially written blob. Leftover temporary files
/// from a crash are removed by [`init`](Self::init).
#[derive(Debug, Clone)]
pub struct FileAttachmentStore {
    path: PathBuf,
}

impl FileAttachmentStore {
    /// A store rooted at `path`.
    ///
    /// # Errors
    /// If the path fails validation (relative, contains `..`, or lies in a
    /// system directory)
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        validate_root(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the root directory if needed and sweep stale temporary files.
    ///
    /// # Errors
    /// If the root cannot be created, or exists but is not a directory
    pub fn init(&self) -> Result<()> {
        internal!("Initialising attachment store at {:?}", self.path);

        if !self.path.try_exists()? {
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(Error::new(
                ErrorKind::NotADirectory,
                format!("Expected {} to be a Directory, but it is not", self.path.display()),
            )
            .into());
        }

        let cleaned = self.cleanup_temp_files()?;
        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from attachment store"
            );
        }

        Ok(())
    }

    fn cleanup_temp_files(&self) -> Result<usize> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            for inner in std::fs::read_dir(entry.path())? {
                let inner = inner?;
                if inner.file_name().to_string_lossy().starts_with(TEMP_FILE_PREFIX) {
                    std::fs::remove_file(inner.path())?;
                    cleaned += 1;
                }
            }
        }

        Ok(cleaned)
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_blob_name(name)?;

        if name
            .rsplit('/')
            .next()
            .is_some_and(|file| file.starts_with(TEMP_FILE_PREFIX))
        {
            return Err(SpoolError::InvalidName(name.to_string()));
        }

        Ok(self.path.join(name))
    }
}

fn not_found(name: &str) -> impl FnOnce(std::io::Error) -> SpoolError + '_ {
    move |err| {
        if err.kind() == ErrorKind::NotFound {
            SpoolError::BlobNotFound(name.to_string())
        } else {
            SpoolError::Io(err)
        }
    }
}

#[async_trait]
impl AttachmentStore for FileAttachmentStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.resolve(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn put(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let path = self.resolve(name)?;
        let parent = path
            .parent()
            .ok_or_else(|| SpoolError::InvalidName(name.to_string()))?;
        fs::create_dir_all(parent).await?;

        let temp = parent.join(format!("{TEMP_FILE_PREFIX}{}", ulid::Ulid::new()));
        fs::write(&temp, data).await?;

        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn open_read(&self, name: &str) -> Result<BlobReader> {
        let path = self.resolve(name)?;
        let file = fs::File::open(&path).await.map_err(not_found(name))?;
        Ok(Box::pin(file))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path).await.map_err(not_found(name))?;

        // Drop the now empty `<id>` directory; anything still in it stays.
        if let Some(parent) = path.parent()
            && parent != self.path
        {
            let _ = fs::remove_dir(parent).await;
        }

        Ok(())
    }
}
