use postboard_common::model::image::ImageFileName;
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Directory that uploaded images are written to and served from.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// Creates the directory if it does not exist yet.
    pub async fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_of(&self, name: &ImageFileName) -> PathBuf {
        self.dir.join(name.get())
    }

    /// Writes the image, replacing any earlier upload with the same name.
    pub async fn save(&self, name: &ImageFileName, contents: &[u8]) -> io::Result<()> {
        let path = self.path_of(name);
        debug!(path = %path.display(), bytes = contents.len(), "Storing uploaded image");
        tokio::fs::write(path, contents).await
    }
}
