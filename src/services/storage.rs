use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

/// A generated image written to the output directory.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub filename: String,
    pub hash: String,
}

/// Local image storage rooted at the configured output directory.
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(StorageError::Io)?;
        Ok(Self { root })
    }

    /// Persist image bytes as `<hash16>_<uuid8>.<ext>`.
    pub async fn save(&self, data: &[u8]) -> Result<StoredImage, StorageError> {
        let format = image::guess_format(data).map_err(|_| StorageError::NotAnImage)?;
        let extension = format.extensions_str().first().copied().unwrap_or("png");

        let hash = content_hash(data);
        let suffix = Uuid::new_v4().simple().to_string();
        let filename = format!("{}_{}.{}", hash, &suffix[..8], extension);

        tokio::fs::write(self.root.join(&filename), data)
            .await
            .map_err(StorageError::Io)?;

        Ok(StoredImage { filename, hash })
    }

    /// Read a previously stored image. Only bare file names are accepted.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        if !is_plain_filename(filename) {
            return Err(StorageError::InvalidName(filename.to_string()));
        }

        match tokio::fs::read(self.root.join(filename)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// First 16 hex characters of the SHA-256 digest.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex_from_bytes(&digest[..8])
}

fn hex_from_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Guess a content type for a stored image from its bytes.
pub fn content_type_for(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::WebP) => "image/webp",
        _ => "image/png",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact is not a recognised image format")]
    NotAnImage,

    #[error("invalid image name '{0}'")]
    InvalidName(String),

    #[error("image '{0}' not found")]
    NotFound(String),
}
