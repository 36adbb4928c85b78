use std::borrow::Cow;

use chrono::{Datelike, Utc};

const PAGE_BASE_STYLES: &str = r#"
        :root { color-scheme: light; }
        body { font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f8fafc; color: #0f172a; }
        header { background: #ffffff; padding: 2rem 1.5rem; border-bottom: 1px solid #e2e8f0; }
        header h1 { margin: 0; }
        .layout { display: grid; grid-template-columns: 280px 1fr; gap: 2rem; padding: 2rem 1.5rem; max-width: 1280px; margin: 0 auto; box-sizing: border-box; }
        aside { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.25rem; align-self: start; }
        aside h2 { font-size: 1.05rem; margin: 1.25rem 0 0.5rem; }
        aside h2:first-child { margin-top: 0; }
        aside code { background: #f1f5f9; padding: 0.1rem 0.35rem; border-radius: 4px; }
        main { min-width: 0; }
        section { margin-bottom: 2rem; }
        .panel { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.5rem; box-shadow: 0 18px 40px rgba(15, 23, 42, 0.08); }
        .panel h2 { margin-top: 0; }
        .columns { display: grid; grid-template-columns: 6fr 8fr; gap: 2rem; }
        label { display: block; margin-bottom: 0.5rem; font-weight: 600; color: #0f172a; }
        input[type="file"] { display: block; margin-bottom: 1rem; }
        button, .button { display: inline-block; padding: 0.55rem 1rem; border: none; border-radius: 8px; background: #2563eb; color: #ffffff; font-weight: 600; font-size: 0.9rem; cursor: pointer; text-decoration: none; transition: background 0.15s ease; }
        button:hover, .button:hover { background: #1d4ed8; }
        button.danger { background: #dc2626; }
        button.danger:hover { background: #b91c1c; }
        button.secondary, .button.secondary { background: #e2e8f0; color: #0f172a; }
        form.inline { display: inline; margin: 0; }
        .flash { padding: 1rem 1.25rem; border-radius: 10px; margin-bottom: 1rem; font-weight: 600; border: 1px solid transparent; }
        .flash.success { background: #ecfdf3; border-color: #bbf7d0; color: #166534; }
        .flash.info { background: #eff6ff; border-color: #bfdbfe; color: #1d4ed8; }
        .flash.error { background: #fef2f2; border-color: #fecaca; color: #b91c1c; }
        .flash.warning { background: #fffbeb; border-color: #fde68a; color: #92400e; }
        .note { color: #475569; font-size: 0.95rem; line-height: 1.6; }
        .file-table { width: 100%; border-collapse: collapse; margin-bottom: 1rem; }
        .file-table th, .file-table td { padding: 0.6rem 0.75rem; border: 1px solid #e2e8f0; text-align: left; font-size: 0.92rem; }
        .file-table th { background: #f1f5f9; }
        .file-table td.name { word-break: break-all; }
        .file-table td.actions { white-space: nowrap; }
        .actions-row { display: flex; flex-wrap: wrap; gap: 0.75rem; margin-top: 1rem; }
        .preview iframe { width: 100%; height: 1000px; border: 1px solid #e2e8f0; border-radius: 12px; background: #ffffff; }
        .app-footer { margin-top: 3rem; text-align: center; font-size: 0.85rem; color: #94a3b8; }
        @media (max-width: 960px) {
            .layout { grid-template-columns: 1fr; }
            .columns { grid-template-columns: 1fr; }
            .preview iframe { height: 640px; }
        }
"#;

pub struct PageLayout<'a> {
    pub meta_title: &'a str,
    pub page_heading: &'a str,
    pub sidebar_html: Cow<'a, str>,
    pub body_html: Cow<'a, str>,
    pub footer_html: Cow<'a, str>,
}

pub fn render_page(layout: PageLayout<'_>) -> String {
    let PageLayout {
        meta_title,
        page_heading,
        sidebar_html,
        body_html,
        footer_html,
    } = layout;

    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
    <meta charset="UTF-8">
    <title>{meta_title}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
{styles}
    </style>
</head>
<body>
    <header>
        <h1>{page_heading}</h1>
    </header>
    <div class="layout">
        <aside>
{sidebar_html}
        </aside>
        <main>
{body_html}
            {footer_html}
        </main>
    </div>
</body>
</html>"#,
        meta_title = escape_html(meta_title),
        page_heading = escape_html(page_heading),
        styles = PAGE_BASE_STYLES,
        sidebar_html = sidebar_html,
        body_html = body_html,
        footer_html = footer_html,
    )
}

pub fn render_footer() -> String {
    let current_year = Utc::now().year();
    format!(
        r#"<footer class="app-footer">© 2023-{year} Office 转 PDF 转换器 · 文件仅在本次会话中临时保存</footer>"#,
        year = current_year
    )
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
