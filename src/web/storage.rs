use std::path::Path;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::web::{ApiError, json_error};

/// Stream a file with a standard attachment disposition.
pub async fn stream_file(
    path: &Path,
    filename: &str,
    content_type: &str,
) -> Result<Response, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        error!(?err, file = %path.display(), "failed to read download file");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "文件读取失败。")
    })?;

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(content_type)
        .map_err(|_| json_error(StatusCode::INTERNAL_SERVER_ERROR, "下载头信息无效。"))?;
    headers.insert(header::CONTENT_TYPE, content_type);

    let disposition = content_disposition(filename);
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| json_error(StatusCode::INTERNAL_SERVER_ERROR, "下载头信息无效。"))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((headers, bytes).into_response())
}

/// `attachment` disposition with an ASCII fallback plus the RFC 5987 UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}
