use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::web::{AppState, converter};

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config().max_upload_bytes;

    Router::new()
        .route("/", get(converter::home))
        .route("/convert", post(converter::convert_uploads))
        .route("/files/:name", get(converter::download_file))
        .route("/files/:name/delete", post(converter::delete_file))
        .route("/workspace/clear", post(converter::clear_workspace))
        .route("/archive", get(converter::download_archive))
        .route("/api/files", get(converter::list_workspace_files))
        .route("/session/reset", post(converter::reset_session))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, Response, header},
    };
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    use super::*;
    use crate::{config::AppConfig, web::session::SESSION_COOKIE};

    fn app(root: &TempDir, soffice_bin: PathBuf) -> Router {
        app_with(AppConfig {
            workspace_root: root.path().to_path_buf(),
            soffice_bin,
            ..AppConfig::default()
        })
    }

    fn app_with(config: AppConfig) -> Router {
        build_router(AppState::new(config))
    }

    fn session_cookie(response: &Response<Body>) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(SESSION_COOKIE))
            .and_then(|value| value.split(';').next())
            .map(str::to_string)
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let root = tempdir().unwrap();
        let response = app(&root, "missing-soffice".into())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn home_issues_cookie_and_creates_workspace() {
        let root = tempdir().unwrap();
        let response = app(&root, root.path().join("missing-soffice"))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_some());
        let html = body_text(response).await;
        assert!(html.contains("暂无可下载的 PDF 文件"));
        assert!(html.contains("LibreOffice (unavailable)"));

        let dirs: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(dirs.len(), 1);
    }

    #[tokio::test]
    async fn archive_without_pdfs_is_not_found() {
        let root = tempdir().unwrap();
        let app = app(&root, root.path().join("missing-soffice"));

        let home = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let cookie = session_cookie(&home).unwrap();

        let response = app
            .oneshot(get_with_cookie("/archive", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_session_lists_nothing() {
        let root = tempdir().unwrap();
        let response = app(&root, root.path().join("missing-soffice"))
            .oneshot(Request::builder().uri("/api/files").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "[]");
    }

    #[cfg(unix)]
    mod conversion {
        use std::{fs, os::unix::fs::PermissionsExt};

        use super::*;

        const BOUNDARY: &str = "converter-test-boundary";

        fn fake_soffice(dir: &TempDir) -> PathBuf {
            let path = dir.path().join("soffice");
            fs::write(
                &path,
                r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "LibreOffice 7.6.4.1 test"
    exit 0
fi
outdir="$6"
input="$7"
name=$(basename "$input")
stem="${name%.*}"
if [ "$stem" = "broken" ]; then
    echo "Error: source file could not be loaded" >&2
    exit 1
fi
printf '%%PDF-1.4' > "$outdir/$stem.pdf"
echo "convert $input -> $outdir/$stem.pdf using filter : writer_pdf_Export"
"#,
            )
            .unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn upload(file_name: &str, contents: &[u8], cookie: Option<&str>) -> Request<Body> {
            upload_many(&[(file_name, contents)], cookie)
        }

        fn upload_many(files: &[(&str, &[u8])], cookie: Option<&str>) -> Request<Body> {
            let mut body = Vec::new();
            for (file_name, contents) in files {
                body.extend_from_slice(
                    format!(
                        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(contents);
                body.extend_from_slice(b"\r\n");
            }
            body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

            let mut builder = Request::builder()
                .method("POST")
                .uri("/convert")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                );
            if let Some(cookie) = cookie {
                builder = builder.header(header::COOKIE, cookie);
            }
            builder.body(Body::from(body)).unwrap()
        }

        #[tokio::test]
        async fn upload_converts_and_serves_pdf() {
            let root = tempdir().unwrap();
            let bin = tempdir().unwrap();
            let app = app(&root, fake_soffice(&bin));

            let response = app
                .clone()
                .oneshot(upload("letter.docx", b"docx bytes", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let cookie = session_cookie(&response).unwrap();
            let html = body_text(response).await;
            assert!(html.contains("转换成功：letter.pdf"));
            assert!(html.contains("预览：letter.pdf"));
            assert!(html.contains("LibreOffice 7.6.4.1 test"));

            let download = app
                .clone()
                .oneshot(get_with_cookie("/files/letter.pdf", &cookie))
                .await
                .unwrap();
            assert_eq!(download.status(), StatusCode::OK);
            assert_eq!(body_text(download).await, "%PDF-1.4");

            let listing = app
                .clone()
                .oneshot(get_with_cookie("/api/files?kind=pdf", &cookie))
                .await
                .unwrap();
            let listing: serde_json::Value =
                serde_json::from_str(&body_text(listing).await).unwrap();
            assert_eq!(listing.as_array().unwrap().len(), 1);
            assert_eq!(listing[0]["name"], "letter.pdf");

            let archive = app
                .clone()
                .oneshot(get_with_cookie("/archive", &cookie))
                .await
                .unwrap();
            assert_eq!(archive.status(), StatusCode::OK);

            let delete = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/files/letter.pdf/delete")
                        .header(header::COOKIE, &cookie)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(delete.status(), StatusCode::SEE_OTHER);

            let listing = app
                .oneshot(get_with_cookie("/api/files?suffix=docx", &cookie))
                .await
                .unwrap();
            assert_eq!(body_text(listing).await, "[]");
        }

        #[tokio::test]
        async fn duplicate_upload_is_skipped() {
            let root = tempdir().unwrap();
            let bin = tempdir().unwrap();
            let app = app(&root, fake_soffice(&bin));

            let first = app
                .clone()
                .oneshot(upload("notes.odt", b"same", None))
                .await
                .unwrap();
            let cookie = session_cookie(&first).unwrap();

            let second = app
                .oneshot(upload("notes.odt", b"same", Some(&cookie)))
                .await
                .unwrap();
            let html = body_text(second).await;
            assert!(html.contains("跳过重复转换"));
            assert!(!html.contains("转换成功"));
        }

        async fn listed_names(app: &Router, cookie: &str) -> Vec<String> {
            let listing = app
                .clone()
                .oneshot(get_with_cookie("/api/files", cookie))
                .await
                .unwrap();
            let listing: serde_json::Value =
                serde_json::from_str(&body_text(listing).await).unwrap();
            let mut names: Vec<String> = listing
                .as_array()
                .unwrap()
                .iter()
                .map(|file| file["name"].as_str().unwrap().to_string())
                .collect();
            names.sort();
            names
        }

        #[tokio::test]
        async fn batch_stops_at_first_failed_conversion() {
            let root = tempdir().unwrap();
            let bin = tempdir().unwrap();
            let app = app(&root, fake_soffice(&bin));

            let response = app
                .clone()
                .oneshot(upload_many(
                    &[("broken.docx", &b"bad"[..]), ("letter.docx", &b"good"[..])],
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let cookie = session_cookie(&response).unwrap();
            let html = body_text(response).await;
            assert!(html.contains("`broken.docx` 转换失败"));
            assert!(html.contains("could not be loaded"));
            assert!(!html.contains("转换成功"));

            assert_eq!(listed_names(&app, &cookie).await, vec!["broken.docx"]);
        }

        #[tokio::test]
        async fn too_many_files_are_rejected_before_storing() {
            let root = tempdir().unwrap();
            let bin = tempdir().unwrap();
            let app = app_with(AppConfig {
                workspace_root: root.path().to_path_buf(),
                soffice_bin: fake_soffice(&bin),
                max_upload_files: 2,
                ..AppConfig::default()
            });

            let response = app
                .clone()
                .oneshot(upload_many(
                    &[("a.docx", &b"a"[..]), ("b.docx", &b"b"[..]), ("c.docx", &b"c"[..])],
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let cookie = session_cookie(&response).unwrap();
            let html = body_text(response).await;
            assert!(html.contains("一次最多上传 2 个文件"));
            assert!(!html.contains("转换成功"));

            assert!(listed_names(&app, &cookie).await.is_empty());
        }

        #[tokio::test]
        async fn clear_by_kind_keeps_other_files() {
            let root = tempdir().unwrap();
            let bin = tempdir().unwrap();
            let app = app(&root, fake_soffice(&bin));

            let response = app
                .clone()
                .oneshot(upload_many(
                    &[("letter.docx", &b"one"[..]), ("notes.odt", &b"two"[..])],
                    None,
                ))
                .await
                .unwrap();
            let cookie = session_cookie(&response).unwrap();
            assert_eq!(
                listed_names(&app, &cookie).await,
                vec!["letter.docx", "letter.pdf", "notes.odt", "notes.pdf"]
            );

            let clear = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/workspace/clear?kind=pdf")
                        .header(header::COOKIE, &cookie)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(clear.status(), StatusCode::SEE_OTHER);
            assert_eq!(
                listed_names(&app, &cookie).await,
                vec!["letter.docx", "notes.odt"]
            );
        }

        #[tokio::test]
        async fn rejects_unsupported_extension() {
            let root = tempdir().unwrap();
            let bin = tempdir().unwrap();
            let response = app(&root, fake_soffice(&bin))
                .oneshot(upload("sheet.xlsx", b"xlsx", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_text(response).await.contains("不支持的文件类型"));
        }

        #[tokio::test]
        async fn reset_removes_workspace_and_cookie() {
            let root = tempdir().unwrap();
            let bin = tempdir().unwrap();
            let app = app(&root, fake_soffice(&bin));

            let response = app
                .clone()
                .oneshot(upload("letter.docx", b"docx", None))
                .await
                .unwrap();
            let cookie = session_cookie(&response).unwrap();
            assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);

            let reset = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/session/reset")
                        .header(header::COOKIE, &cookie)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(reset.status(), StatusCode::SEE_OTHER);
            assert!(
                reset
                    .headers()
                    .get_all(header::SET_COOKIE)
                    .iter()
                    .any(|value| value.to_str().unwrap().contains("Max-Age=0"))
            );
            assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
        }
    }
}
