use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::errors::ApiError;
use crate::models::WebPage;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_PAGE_CHARS: usize = 15_000;
pub const MAX_FILE_CHARS: usize = 15_000;
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
pub const TRUNCATION_MARKER: &str = "\n\n[content truncated...]";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const FALLBACK_PAGE_TITLE: &str = "Web page";

lazy_static! {
    static ref NOISE_BLOCKS: Vec<Regex> = ["script", "style", "nav", "footer", "header"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap())
        .collect();
    static ref PARAGRAPH_END: Regex = Regex::new(r"(?i)</(p|h[1-6])\s*>").unwrap();
    static ref LINE_END: Regex = Regex::new(r"(?i)<br[^>]*>|</(div|li)\s*>").unwrap();
    static ref ANY_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref INLINE_SPACE: Regex = Regex::new(r"[^\S\n]+").unwrap();
    static ref SPACE_AROUND_NEWLINE: Regex = Regex::new(r" ?\n ?").unwrap();
    static ref BLANK_LINES: Regex = Regex::new(r"\n{3,}").unwrap();
    static ref TITLE_TAG: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    static ref SITE_SUFFIX: Regex = Regex::new(r"\s+[-|–]\s+.*$").unwrap();
    static ref H1_TAG: Regex = Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap();
    static ref META_TAG: Regex = Regex::new(r"(?is)<meta\b[^>]*>").unwrap();
    static ref META_KEY: Regex = Regex::new(r#"(?i)\b(?:name|property)\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref META_CONTENT: Regex = Regex::new(r#"(?is)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
    static ref FRONTMATTER: Regex = Regex::new(r"(?s)\A\s*---\r?\n.*?\r?\n---[ \t]*(?:\r?\n|\z)").unwrap();
}

/// Visible text of an HTML document with paragraph breaks preserved.
pub fn extract_text(html: &str) -> String {
    let mut text = html.to_string();
    for block in NOISE_BLOCKS.iter() {
        text = block.replace_all(&text, "").into_owned();
    }
    text = PARAGRAPH_END.replace_all(&text, "\n\n").into_owned();
    text = LINE_END.replace_all(&text, "\n").into_owned();
    text = ANY_TAG.replace_all(&text, " ").into_owned();

    let text = html_escape::decode_html_entities(&text).replace('\u{a0}', " ");
    let text = INLINE_SPACE.replace_all(&text, " ");
    let text = SPACE_AROUND_NEWLINE.replace_all(&text, "\n");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn strip_tags(fragment: &str) -> String {
    let text = ANY_TAG.replace_all(fragment, "");
    let text = html_escape::decode_html_entities(&text);
    INLINE_SPACE.replace_all(text.trim(), " ").into_owned()
}

fn meta_content(html: &str, key: &str) -> Option<String> {
    META_TAG.find_iter(html).find_map(|tag| {
        let tag = tag.as_str();
        let name = META_KEY.captures(tag)?.get(1)?.as_str();
        if !name.eq_ignore_ascii_case(key) {
            return None;
        }
        let caps = META_CONTENT.captures(tag)?;
        let value = caps.get(1).or_else(|| caps.get(2))?.as_str();
        let value = html_escape::decode_html_entities(value).trim().to_string();
        (!value.is_empty()).then_some(value)
    })
}

pub fn extract_title(html: &str) -> String {
    if let Some(caps) = TITLE_TAG.captures(html) {
        let title = strip_tags(caps.get(1).map_or("", |m| m.as_str()));
        let title = SITE_SUFFIX.replace(&title, "").trim().to_string();
        if title.chars().count() > 5 {
            return title;
        }
    }

    if let Some(title) = meta_content(html, "og:title") {
        return title;
    }

    if let Some(caps) = H1_TAG.captures(html) {
        let heading = strip_tags(caps.get(1).map_or("", |m| m.as_str()));
        if !heading.is_empty() {
            return heading;
        }
    }

    FALLBACK_PAGE_TITLE.to_string()
}

pub fn extract_description(html: &str) -> String {
    meta_content(html, "description")
        .or_else(|| meta_content(html, "og:description"))
        .unwrap_or_default()
}

/// Cut `text` to at most `max_chars` characters, appending `marker` when cut.
pub fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], marker),
        None => text.to_string(),
    }
}

/// Parse and check a user-supplied page address.
pub fn validate_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw.trim())
        .map_err(|_| ApiError::BadRequest("Invalid web page URL".to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ApiError::BadRequest("Only HTTP and HTTPS URLs are supported".to_string())),
    }
}

/// Fetches web pages for card generation.
#[derive(Debug, Clone)]
pub struct WebFetcher {
    client: Client,
}

impl WebFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(BROWSER_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Download `raw_url` and extract its readable content, truncated to `max_chars`.
    pub async fn fetch(&self, raw_url: &str, max_chars: usize) -> Result<WebPage, ApiError> {
        let url = validate_url(raw_url)?;
        info!(url = %url, "Fetching web page");

        let response = self
            .client
            .get(url.clone())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Web page request failed");
                if e.is_timeout() {
                    ApiError::BadRequest("Timed out fetching the web page".to_string())
                } else {
                    ApiError::BadRequest("Could not reach the web page".to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::BadRequest(format!(
                "Could not access the web page ({})",
                status
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.contains("text/html") {
            return Err(ApiError::BadRequest("The link is not an HTML page".to_string()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Could not read the web page: {}", e)))?;

        let content = extract_text(&html);
        if content.is_empty() {
            return Err(ApiError::BadRequest(
                "No readable text could be extracted from the web page".to_string(),
            ));
        }

        Ok(WebPage {
            title: extract_title(&html),
            description: extract_description(&html),
            word_count: content.split_whitespace().count(),
            content: truncate_chars(&content, max_chars, TRUNCATION_MARKER),
            url: url.to_string(),
        })
    }
}

/// Upload formats accepted for card generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Markdown,
    Text,
}

impl FileKind {
    /// Extension first, then MIME type.
    pub fn detect(file_name: &str, mime: Option<&str>) -> Option<Self> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => return Some(FileKind::Pdf),
            "md" | "markdown" => return Some(FileKind::Markdown),
            "txt" => return Some(FileKind::Text),
            _ => {}
        }

        match mime.map(|m| m.split(';').next().unwrap_or("").trim().to_lowercase()).as_deref() {
            Some("application/pdf") => Some(FileKind::Pdf),
            Some("text/markdown") | Some("text/x-markdown") => Some(FileKind::Markdown),
            Some("text/plain") => Some(FileKind::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Markdown => "markdown",
            FileKind::Text => "text",
        }
    }
}

/// Drop a leading YAML frontmatter block.
pub fn strip_frontmatter(markdown: &str) -> String {
    FRONTMATTER.replace(markdown, "").trim().to_string()
}

/// Decode an uploaded text or markdown file.
pub fn decode_text_file(kind: FileKind, bytes: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(bytes);
    let text = decoded.trim_start_matches('\u{feff}');
    match kind {
        FileKind::Markdown => strip_frontmatter(text),
        _ => text.trim().to_string(),
    }
}

/// Text layer of an uploaded PDF. `None` when the file has no readable text,
/// so the caller can try another extractor.
pub async fn extract_pdf_text(bytes: Vec<u8>) -> Option<String> {
    let size_bytes = bytes.len();
    let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes)).await;

    match extracted {
        Ok(Ok(text)) if !text.trim().is_empty() => {
            info!(size_bytes = size_bytes, chars = text.chars().count(), "Extracted PDF text locally");
            Some(text.trim().to_string())
        }
        Ok(Ok(_)) => {
            info!(size_bytes = size_bytes, "PDF has no text layer");
            None
        }
        Ok(Err(e)) => {
            warn!(size_bytes = size_bytes, error = ?e, "Local PDF extraction failed");
            None
        }
        // The parser panics on some malformed files
        Err(e) => {
            warn!(size_bytes = size_bytes, error = %e, "PDF extraction task failed");
            None
        }
    }
}
