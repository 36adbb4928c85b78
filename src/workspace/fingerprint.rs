use std::{io::ErrorKind, path::Path};

/// Weak duplicate key: file name plus byte size, never the content.
///
/// Two different files that share a name and a size compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    name: String,
    size: u64,
}

impl Fingerprint {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Fingerprint of the file currently at `path`, or `None` if there is no
    /// regular file there. The size is read from disk on every call.
    pub async fn of_file(path: &Path) -> std::io::Result<Option<Self>> {
        let Some(name) = path.file_name() else {
            return Ok(None);
        };

        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(Self::new(
                name.to_string_lossy().into_owned(),
                metadata.len(),
            ))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}
