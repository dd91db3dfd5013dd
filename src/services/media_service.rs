use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Storage for user-uploaded images referenced by posts.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Stores an image and returns its public URL.
    async fn upload(&self, bytes: Vec<u8>, content_type: &str, folder: &str) -> Result<String>;

    async fn delete(&self, url: &str) -> Result<()>;
}

/// Writes media under a local directory that the HTTP layer serves at `/uploads`.
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
    public_url: String,
    max_size: usize,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str, max_size: usize) -> Self {
        Self {
            root: root.into(),
            public_url: format!("{}/uploads", public_base_url.trim_end_matches('/')),
            max_size,
        }
    }

    // Maps a public URL back to a file below the root, rejecting anything else.
    fn resolve(&self, url: &str) -> Result<PathBuf> {
        let relative = url
            .strip_prefix(&self.public_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| AppError::BadRequest(format!("Not a local media URL: {}", url)))?;

        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::BadRequest(format!("Invalid media path: {}", url)));
        }
        Ok(self.root.join(relative))
    }
}

// The declared type has to name the format the bytes decode as.
fn declared_type_matches(content_type: &str, format: image::ImageFormat) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let Some(declared) = mime_guess::get_mime_extensions_str(&essence) else {
        return false;
    };
    format
        .extensions_str()
        .iter()
        .any(|ext| declared.contains(ext))
}

fn valid_folder(folder: &str) -> bool {
    !folder.is_empty()
        && folder
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str, folder: &str) -> Result<String> {
        if bytes.len() > self.max_size {
            return Err(AppError::ContentTooLarge);
        }
        if !content_type.starts_with("image/") {
            return Err(AppError::UnsupportedMediaType);
        }
        if !valid_folder(folder) {
            return Err(AppError::Validation(format!("Invalid upload folder: {}", folder)));
        }

        // Trust the bytes, not the declared type.
        let format = image::guess_format(&bytes).map_err(|_| AppError::UnsupportedMediaType)?;
        if !declared_type_matches(content_type, format) {
            return Err(AppError::UnsupportedMediaType);
        }
        image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| AppError::BadRequest(format!("Invalid image: {}", e)))?;

        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let file_name = format!("{}.{}", Uuid::new_v4().simple(), extension);

        let dir = self.root.join(folder);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(&file_name), &bytes).await?;

        tracing::info!(
            folder,
            file_name = %file_name,
            size = bytes.len(),
            content_type,
            "media stored"
        );
        Ok(format!("{}/{}/{}", self.public_url, folder, file_name))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let path = self.resolve(url)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Media not found: {}", url)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Deletes media without failing the caller. Returns whether it was removed.
pub async fn remove_media_best_effort(media: &dyn MediaStore, url: &str) -> bool {
    match media.delete(url).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(url, error = %e, "failed to remove media");
            false
        }
    }
}
