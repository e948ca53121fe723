use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::ImageUpload;

/// Directory under the static root holding uploaded images.
pub const UPLOAD_SUBDIR: &str = "uploads";
/// Public prefix of every stored image reference.
pub const URL_PREFIX: &str = "/static/uploads/";

const STAGING_SUBDIR: &str = ".staging";
const MAX_REFERENCE_LEN: usize = 255;

/// Reduces a client-supplied file name to `[A-Za-z0-9_.-]` with no path components.
/// Returns an empty string when nothing usable is left.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Image directory on local disk. Files are written to a staging area first
/// and only moved into place once the row referencing them has committed.
///
/// Publishing (row commit then rename) and releasing (reference count then
/// unlink) both run under [`UploadStore::lock`], so a release can never unlink
/// a same-named file that a concurrent request has just published.
#[derive(Debug)]
pub struct UploadStore {
    dir: PathBuf,
    staging: PathBuf,
    publish: Mutex<()>,
}

impl UploadStore {
    /// Creates the upload directories under `static_dir` and purges staged
    /// files left behind by an earlier crash.
    pub async fn open(static_dir: &Path) -> std::io::Result<Self> {
        let dir = static_dir.join(UPLOAD_SUBDIR);
        let staging = dir.join(STAGING_SUBDIR);
        fs::create_dir_all(&staging).await?;

        let mut purged = 0usize;
        let mut entries = fs::read_dir(&staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            } else {
                fs::remove_file(entry.path()).await?;
            }
            purged += 1;
        }
        if purged > 0 {
            warn!(purged, "Removed leftover staged uploads");
        }

        Ok(Self {
            dir,
            staging,
            publish: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serializes changes to the public upload directory. Hold the guard from
    /// the row write until the file is promoted, and from the reference
    /// re-count until the released file is removed.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.publish.lock().await
    }

    /// Writes the upload to the staging area under a random name.
    pub async fn stage(&self, upload: &ImageUpload) -> AppResult<StagedImage> {
        let file_name = sanitize_filename(&upload.file_name);
        if file_name.is_empty() {
            return Err(AppError::invalid_field(
                "image",
                format!("file name {:?} has no usable characters", upload.file_name),
            ));
        }
        let url = format!("{}{}", URL_PREFIX, file_name);
        if url.len() > MAX_REFERENCE_LEN {
            return Err(AppError::invalid_field("image", "file name is too long"));
        }

        let staging_path = self.staging.join(Uuid::new_v4().to_string());
        fs::write(&staging_path, &upload.bytes).await?;
        debug!(file = %file_name, bytes = upload.bytes.len(), "Staged upload");

        Ok(StagedImage {
            staging_path,
            final_path: self.dir.join(&file_name),
            url,
            settled: false,
        })
    }

    /// Deletes the file behind an image reference. Already-missing files and
    /// references outside the upload directory are left alone.
    pub async fn remove(&self, url: &str) -> std::io::Result<()> {
        let name = match url.strip_prefix(URL_PREFIX) {
            Some(name) if !name.is_empty() && sanitize_filename(name) == name => name,
            _ => {
                warn!(image = %url, "Not removing image outside the upload directory");
                return Ok(());
            }
        };

        match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => {
                debug!(image = %url, "Removed released upload");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// An upload waiting for its row to commit. Either [`StagedImage::promote`]
/// or [`StagedImage::discard`] it; dropping it unsettled deletes the staged
/// file as a fallback.
#[derive(Debug)]
pub struct StagedImage {
    staging_path: PathBuf,
    final_path: PathBuf,
    url: String,
    settled: bool,
}

impl StagedImage {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Moves the file to its public path, replacing any same-named upload.
    pub async fn promote(mut self) -> std::io::Result<()> {
        fs::rename(&self.staging_path, &self.final_path).await?;
        self.settled = true;
        Ok(())
    }

    /// Deletes the staged file.
    pub async fn discard(mut self) {
        self.settled = true;
        if let Err(e) = fs::remove_file(&self.staging_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.staging_path.display(), error = %e, "Failed to discard staged upload");
            }
        }
    }
}

// Reached only when a request future is cancelled or a rename fails; the
// handlers discard explicitly on error. One blocking unlink of a small file.
impl Drop for StagedImage {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.staging_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.staging_path.display(), error = %e, "Failed to discard staged upload");
            }
        }
    }
}
