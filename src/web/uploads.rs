use std::path::Path;

use axum::{body::Bytes, extract::Multipart};

use crate::workspace::{Fingerprint, safe_file_name};

/// Result type used by the upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when validating uploaded files.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// Configuration describing the expectations for the multipart file field.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    pub allowed_extensions: &'a [&'a str],
    pub max_files: usize,
    pub min_files: usize,
}

impl<'a> FileFieldConfig<'a> {
    pub fn new(field_name: &'a str, allowed_extensions: &'a [&'a str], max_files: usize) -> Self {
        Self {
            field_name,
            allowed_extensions,
            max_files,
            min_files: if max_files == 0 { 0 } else { 1 },
        }
    }
}

/// An upload held in memory until the duplicate check has run.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    /// Validated on-disk name.
    pub stored_name: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.stored_name, self.bytes.len() as u64)
    }
}

/// Read the configured file field from a multipart form.
///
/// Fields other than `config.field_name` are ignored, as are file inputs
/// left empty by the browser.
pub async fn read_upload_form(
    mut multipart: Multipart,
    config: &FileFieldConfig<'_>,
) -> UploadResult<Vec<UploadedFile>> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("解析上传表单失败: {err}")))?
    {
        if field.name() != Some(config.field_name) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if file_name.is_empty() {
            continue;
        }

        if files.len() >= config.max_files {
            return Err(UploadError::new(format!(
                "一次最多上传 {} 个文件",
                config.max_files
            )));
        }

        let stored_name = validate_file_name(&file_name, config)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|err| UploadError::new(format!("读取上传数据失败: {err}")))?;

        files.push(UploadedFile {
            original_name: file_name,
            stored_name,
            bytes,
        });
    }

    if files.len() < config.min_files {
        return Err(UploadError::new(format!(
            "至少需要上传 {} 个文件",
            config.min_files
        )));
    }

    Ok(files)
}

fn validate_file_name(file_name: &str, config: &FileFieldConfig<'_>) -> UploadResult<String> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if !config.allowed_extensions.is_empty()
        && !config
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        return Err(UploadError::new(format!(
            "不支持的文件类型: `{file_name}`（仅支持 {}）",
            config.allowed_extensions.join(", ")
        )));
    }

    safe_file_name(file_name)
        .map_err(|_| UploadError::new(format!("文件名无效: `{file_name}`")))
}
