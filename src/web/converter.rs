use std::{borrow::Cow, path::Path};

use axum::{
    Json,
    extract::{Multipart, Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    web::{
        AppState,
        responses::{ApiError, json_error, session_missing, workspace_error},
        session::{clear_session, existing_session, resolve_session},
        storage::stream_file,
        templates::{PageLayout, escape_html, render_footer, render_page},
        uploads::{FileFieldConfig, UploadedFile, read_upload_form},
    },
    workspace::{
        DOCUMENT_EXTENSIONS, DeleteMatching, FileFilter, FileKind, StoredFile, Workspace,
        WorkspaceResult, archive, delete_matching, find_file, is_duplicate,
        list_files, safe_file_name, store_upload,
    },
};

const UPLOAD_FIELD: &str = "files";
const PAGE_TITLE: &str = "Office 转 PDF 转换器";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashKind {
    Success,
    Info,
    Error,
}

impl FlashKind {
    fn class(self) -> &'static str {
        match self {
            FlashKind::Success => "success",
            FlashKind::Info => "info",
            FlashKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
struct Flash {
    kind: FlashKind,
    message: String,
}

impl Flash {
    fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Info,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

#[derive(Default, Deserialize)]
pub struct HomeQuery {
    pub status: Option<String>,
    pub error: Option<String>,
    pub preview: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct ClearQuery {
    pub kind: Option<FileKind>,
}

#[derive(Default, Deserialize)]
pub struct ListQuery {
    pub kind: Option<FileKind>,
    pub suffix: Option<String>,
}

pub async fn home(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<HomeQuery>,
) -> Result<(CookieJar, Html<String>), (StatusCode, Html<String>)> {
    let (jar, session) = resolve_session(jar);
    let workspace = state
        .workspaces()
        .create_or_get(session)
        .await
        .map_err(|err| {
            error!(?err, %session, "failed to prepare session workspace");
            server_error()
        })?;

    let flashes = compose_flash(&params);
    let html = render_workspace_page(&state, &workspace, &flashes, params.preview.as_deref())
        .await
        .map_err(|err| {
            error!(?err, %session, "failed to render workspace page");
            server_error()
        })?;

    Ok((jar, Html(html)))
}

pub async fn convert_uploads(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<(CookieJar, Html<String>), (StatusCode, Html<String>)> {
    let (jar, session) = resolve_session(jar);
    let workspace = state
        .workspaces()
        .create_or_get(session)
        .await
        .map_err(|err| {
            error!(?err, %session, "failed to prepare session workspace");
            server_error()
        })?;

    let field = FileFieldConfig::new(
        UPLOAD_FIELD,
        DOCUMENT_EXTENSIONS,
        state.config().max_upload_files,
    );

    let mut flashes = Vec::new();
    let preview = match read_upload_form(multipart, &field).await {
        Ok(files) => convert_files(&state, &workspace, files, &mut flashes).await,
        Err(err) => {
            warn!(%err, %session, "rejected upload");
            flashes.push(Flash::error(err.message()));
            None
        }
    };

    let html = render_workspace_page(&state, &workspace, &flashes, preview.as_deref())
        .await
        .map_err(|err| {
            error!(?err, %session, "failed to render workspace page");
            server_error()
        })?;

    Ok((jar, Html(html)))
}

/// Store and convert uploads in order, stopping at the first failure.
/// Returns the name of the last PDF produced, for the preview.
async fn convert_files(
    state: &AppState,
    workspace: &Workspace,
    files: Vec<UploadedFile>,
    flashes: &mut Vec<Flash>,
) -> Option<String> {
    let limit = state.config().convert_timeout;
    let mut preview = None;

    for file in files {
        let fingerprint = file.fingerprint();
        match is_duplicate(workspace, &file.stored_name, &fingerprint).await {
            Ok(true) => {
                info!(
                    name = fingerprint.name(),
                    size = fingerprint.size(),
                    "skipped duplicate upload"
                );
                flashes.push(Flash::info(format!(
                    "`{}` 已在临时文件夹中，跳过重复转换。",
                    file.original_name
                )));
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                error!(?err, file = %file.stored_name, "duplicate check failed");
                flashes.push(Flash::error(format!(
                    "无法检查 `{}`：{err}",
                    file.original_name
                )));
                break;
            }
        }

        let source = match store_upload(workspace, &file.stored_name, &file.bytes).await {
            Ok(path) => path,
            Err(err) => {
                error!(?err, file = %file.stored_name, "failed to store upload");
                flashes.push(Flash::error(format!(
                    "保存 `{}` 失败：{err}",
                    file.original_name
                )));
                break;
            }
        };

        match state.soffice().convert(&source, workspace.path(), limit).await {
            Ok(pdf_path) => {
                let pdf_name = pdf_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                flashes.push(Flash::success(format!("转换成功：{pdf_name}")));
                preview = Some(pdf_name);
            }
            Err(err) => {
                error!(?err, source = %source.display(), "conversion failed");
                flashes.push(Flash::error(format!(
                    "`{}` 转换失败：{err}",
                    file.original_name
                )));
                break;
            }
        }
    }

    preview
}

pub async fn download_file(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(name): AxumPath<String>,
) -> Result<Response, ApiError> {
    let workspace = session_workspace(&state, &jar)
        .await
        .ok_or_else(session_missing)?;

    let file = find_file(&workspace, &name)
        .await
        .map_err(workspace_error)?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "文件不存在。"))?;

    stream_file(
        &file.path,
        &file.name,
        mime::APPLICATION_OCTET_STREAM.as_ref(),
    )
    .await
}

pub async fn download_archive(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let workspace = session_workspace(&state, &jar)
        .await
        .ok_or_else(session_missing)?;
    let config = state.config();

    let archive_path = build_pdf_archive(&workspace, &config.archive_name)
        .await
        .map_err(workspace_error)?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "没有可下载的 PDF 文件。"))?;

    stream_file(
        &archive_path,
        &config.archive_name,
        mime::APPLICATION_OCTET_STREAM.as_ref(),
    )
    .await
}

async fn build_pdf_archive(
    workspace: &Workspace,
    archive_name: &str,
) -> WorkspaceResult<Option<std::path::PathBuf>> {
    let pdfs = list_files(workspace, &FileFilter::Kind(FileKind::Pdf)).await?;
    let paths: Vec<_> = pdfs.into_iter().map(|file| file.path).collect();
    archive(&paths, workspace.path(), archive_name).await
}

pub async fn delete_file(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(name): AxumPath<String>,
) -> Redirect {
    let Some(workspace) = session_workspace(&state, &jar).await else {
        return Redirect::to("/?error=session_missing");
    };
    let Ok(name) = safe_file_name(&name) else {
        return Redirect::to("/?error=invalid_name");
    };

    let stem = match Path::new(&name).file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => name.clone(),
    };

    match delete_matching(&workspace, &DeleteMatching::Stem(stem.clone())).await {
        Ok(removed) => {
            info!(%stem, removed, "deleted files by stem");
            Redirect::to("/?status=deleted")
        }
        Err(err) => {
            error!(?err, %stem, "failed to delete files");
            Redirect::to("/?error=delete_failed")
        }
    }
}

pub async fn clear_workspace(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<ClearQuery>,
) -> Redirect {
    let Some(workspace) = session_workspace(&state, &jar).await else {
        return Redirect::to("/?error=session_missing");
    };

    let predicate = params
        .kind
        .map(DeleteMatching::Kind)
        .unwrap_or(DeleteMatching::All);

    match delete_matching(&workspace, &predicate).await {
        Ok(removed) => {
            info!(?predicate, removed, "cleared workspace files");
            Redirect::to("/?status=cleared")
        }
        Err(err) => {
            error!(?err, ?predicate, "failed to clear workspace");
            Redirect::to("/?error=delete_failed")
        }
    }
}

pub async fn list_workspace_files(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<StoredFile>>, ApiError> {
    let Some(workspace) = session_workspace(&state, &jar).await else {
        return Ok(Json(Vec::new()));
    };

    let filter = match (params.kind, params.suffix) {
        (Some(kind), _) => FileFilter::Kind(kind),
        (None, Some(suffix)) => FileFilter::Suffix(suffix),
        (None, None) => FileFilter::All,
    };

    list_files(&workspace, &filter)
        .await
        .map(Json)
        .map_err(workspace_error)
}

pub async fn reset_session(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(session) = existing_session(&jar) {
        if let Err(err) = state.workspaces().teardown(session).await {
            error!(?err, %session, "failed to tear down session workspace");
        }
    }

    (clear_session(jar), Redirect::to("/?status=reset"))
}

async fn session_workspace(state: &AppState, jar: &CookieJar) -> Option<Workspace> {
    let session = existing_session(jar)?;
    state.workspaces().get(session).await
}

async fn render_workspace_page(
    state: &AppState,
    workspace: &Workspace,
    flashes: &[Flash],
    preview: Option<&str>,
) -> WorkspaceResult<String> {
    let pdfs = list_files(workspace, &FileFilter::Kind(FileKind::Pdf)).await?;
    let preview_html = match preview {
        Some(name) => render_preview(&pdfs, name).await,
        None => String::new(),
    };
    let config = state.config();
    let version = state.converter_version().await;

    let flash_html = flashes
        .iter()
        .map(|flash| {
            format!(
                r#"<div class="flash {class}">{message}</div>"#,
                class = flash.kind.class(),
                message = escape_html(&flash.message),
            )
        })
        .collect::<String>();

    let accept = DOCUMENT_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",");

    let body = format!(
        r#"            {flash_html}
            <div class="columns">
                <section class="panel">
                    <h2>上传 Word 或 LibreOffice 文档</h2>
                    <form method="post" action="/convert" enctype="multipart/form-data">
                        <label for="files">选择文件（最多 {max_files} 个）</label>
                        <input id="files" name="{field}" type="file" accept="{accept}" multiple required>
                        <button type="submit">转换为 PDF</button>
                    </form>
                    <p class="note">同名且大小相同的文件视为重复，不会再次转换。单个文件转换超时时间为 {timeout} 秒。</p>
                </section>
                <section class="panel">
                    <h2>下载或删除已转换的 PDF</h2>
                    {file_section}
                    <div class="actions-row">
                        <form class="inline" method="post" action="/workspace/clear">
                            <button type="submit" class="danger">清空临时文件夹</button>
                        </form>
                        <form class="inline" method="post" action="/session/reset">
                            <button type="submit" class="secondary">重置会话</button>
                        </form>
                    </div>
                </section>
            </div>
            {preview_html}"#,
        flash_html = flash_html,
        max_files = config.max_upload_files,
        field = UPLOAD_FIELD,
        accept = accept,
        timeout = config.convert_timeout.as_secs(),
        file_section = render_file_section(&pdfs, &config.archive_name),
        preview_html = preview_html,
    );

    Ok(render_page(PageLayout {
        meta_title: PAGE_TITLE,
        page_heading: "Office 转 PDF 转换器 📄",
        sidebar_html: Cow::Owned(render_sidebar(version)),
        body_html: Cow::Owned(body),
        footer_html: Cow::Owned(render_footer()),
    }))
}

fn render_file_section(pdfs: &[StoredFile], archive_name: &str) -> String {
    if pdfs.is_empty() {
        return r#"<div class="flash warning">暂无可下载的 PDF 文件。</div>"#.to_string();
    }

    let rows = pdfs
        .iter()
        .map(|file| {
            let encoded = urlencoding::encode(&file.name);
            format!(
                r#"<tr>
                            <td class="name">{name}</td>
                            <td>{size}</td>
                            <td>{modified}</td>
                            <td class="actions">
                                <a class="button secondary" href="/?preview={encoded}">预览</a>
                                <a class="button" href="/files/{encoded}">下载</a>
                                <form class="inline" method="post" action="/files/{encoded}/delete">
                                    <button type="submit" class="danger">删除</button>
                                </form>
                            </td>
                        </tr>"#,
                name = escape_html(&file.name),
                size = format_size(file.size),
                modified = file.modified.format("%Y-%m-%d %H:%M:%S UTC"),
                encoded = encoded,
            )
        })
        .collect::<String>();

    format!(
        r#"<table class="file-table">
                        <thead><tr><th>文件名</th><th>大小</th><th>修改时间</th><th>操作</th></tr></thead>
                        <tbody>
                        {rows}
                        </tbody>
                    </table>
                    <a class="button" href="/archive">打包下载全部 PDF（{archive_name}）</a>"#,
        rows = rows,
        archive_name = escape_html(archive_name),
    )
}

async fn render_preview(pdfs: &[StoredFile], name: &str) -> String {
    let Some(file) = pdfs.iter().find(|file| file.name == name) else {
        return String::new();
    };

    let bytes = match tokio::fs::read(&file.path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(?err, file = %file.path.display(), "failed to read PDF for preview");
            return String::new();
        }
    };

    format!(
        r#"<section class="panel preview">
                <h2>预览：{name}</h2>
                <iframe src="data:{mime};base64,{data}" title="{name}"></iframe>
            </section>"#,
        name = escape_html(&file.name),
        mime = mime::APPLICATION_PDF,
        data = BASE64.encode(&bytes),
    )
}

fn render_sidebar(converter_version: &str) -> String {
    let formats = DOCUMENT_EXTENSIONS
        .iter()
        .map(|ext| format!("<code>{ext}</code>"))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        r#"            <h2>关于</h2>
            <p class="note">将 <strong>Microsoft Word</strong> 或 <strong>LibreOffice Writer</strong> 文档转换为 PDF。</p>
            <p class="note">支持的输入格式：{formats}</p>
            <h2>说明</h2>
            <p class="note">转换由无界面的 <strong>LibreOffice</strong> 完成。LibreOffice 与 Microsoft Office 之间存在兼容性差异，复杂文档的转换效果可能不完美，个别文件可能转换失败。</p>
            <h2>版本</h2>
            <ul class="note">
                <li><code>{package} {package_version}</code></li>
                <li><code>{converter_version}</code></li>
            </ul>"#,
        formats = formats,
        package = env!("CARGO_PKG_NAME"),
        package_version = env!("CARGO_PKG_VERSION"),
        converter_version = escape_html(converter_version),
    )
}

fn compose_flash(params: &HomeQuery) -> Vec<Flash> {
    let mut flashes = Vec::new();

    if let Some(status) = params.status.as_deref() {
        let message = match status {
            "deleted" => Some("文件已删除。"),
            "cleared" => Some("临时文件夹已清空。"),
            "reset" => Some("会话已重置。"),
            _ => None,
        };
        flashes.extend(message.map(Flash::success));
    }

    if let Some(error) = params.error.as_deref() {
        let message = match error {
            "session_missing" => "会话不存在或已过期，请刷新页面后重试。",
            "invalid_name" => "文件名无效。",
            "delete_failed" => "删除文件失败，请稍后重试。",
            _ => "发生未知错误，请稍后重试。",
        };
        flashes.push(Flash::error(message));
    }

    flashes
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn server_error() -> (StatusCode, Html<String>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html("<h1>服务器错误</h1><p>无法准备临时工作目录，请稍后再试。</p>".to_string()),
    )
}
