use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::error::{CacheError, CacheResult};

/// Identifier of a stored artifact.
///
/// Generated freshly for every population attempt and never derived from the
/// request key, so concurrent claims can never collide on a storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// On-disk storage for fetched artifacts.
///
/// Artifacts are staged as temporary files in a sibling `tmp` directory while
/// they are being written. Once fully written they are flushed and atomically
/// moved into the artifact directory, so a file under `artifacts/` is always
/// complete.
#[derive(Debug)]
pub struct ArtifactStore {
    artifact_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates the store under the given base directory.
    ///
    /// Both the artifact and the scratch directory are created if they do not
    /// exist yet.
    pub fn new(base_dir: &Path) -> io::Result<Self> {
        let artifact_dir = base_dir.join("artifacts");
        let tmp_dir = base_dir.join("tmp");
        std::fs::create_dir_all(&artifact_dir)?;
        std::fs::create_dir_all(&tmp_dir)?;

        Ok(Self {
            artifact_dir,
            tmp_dir,
        })
    }

    /// Clears all stored artifacts and temporary files.
    ///
    /// The index lives in memory only, so nothing can refer to artifacts left
    /// behind by a previous process. This runs on startup to reclaim them.
    pub fn clear(&self) -> io::Result<()> {
        for dir in [&self.artifact_dir, &self.tmp_dir] {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    fn artifact_path(&self, id: ArtifactId) -> PathBuf {
        self.artifact_dir.join(id.to_string())
    }

    /// Allocates a fresh artifact id and a writer for its contents.
    ///
    /// The writer exclusively owns the staged file until [`ArtifactWriter::finalize`]
    /// publishes it. Dropping the writer removes the staged file.
    pub fn create(&self) -> CacheResult<ArtifactWriter> {
        let id = ArtifactId::new();
        let temp_file = tempfile::Builder::new()
            .prefix("artifact")
            .tempfile_in(&self.tmp_dir)?;
        let file = File::from_std(temp_file.reopen()?);

        Ok(ArtifactWriter {
            id,
            final_path: self.artifact_path(id),
            temp_file,
            file,
        })
    }

    /// Opens a finalized artifact for reading.
    ///
    /// Returns [`CacheError::NotFound`] if the artifact does not exist or was
    /// never finalized.
    pub async fn open(&self, id: ArtifactId) -> CacheResult<File> {
        match File::open(self.artifact_path(id)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CacheError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the artifact's underlying storage.
    ///
    /// Deleting a non-existent artifact is not an error. Readers that still
    /// hold an open handle keep reading from the unlinked file.
    pub async fn delete(&self, id: ArtifactId) -> CacheResult<()> {
        match tokio::fs::remove_file(self.artifact_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write handle for an artifact being populated.
#[derive(Debug)]
pub struct ArtifactWriter {
    id: ArtifactId,
    final_path: PathBuf,
    temp_file: NamedTempFile,
    file: File,
}

impl ArtifactWriter {
    /// The id this artifact will be published under.
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// Appends a chunk to the staged artifact.
    pub async fn write(&mut self, chunk: &[u8]) -> CacheResult<()> {
        self.file.write_all(chunk).await?;
        Ok(())
    }

    /// Flushes all written bytes to disk and publishes the artifact.
    ///
    /// Only after this returns may the id be referenced from a `Ready` cache
    /// entry; the rename into the artifact directory is atomic.
    pub async fn finalize(self) -> CacheResult<ArtifactId> {
        let Self {
            id,
            final_path,
            temp_file,
            mut file,
        } = self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp_file
            .persist(&final_path)
            .map_err(|e| CacheError::from(e.error))?;

        Ok(id)
    }
}
