//! Resume document collaborator and resume text helpers
//!
//! The orchestrator only needs `url -> plain text`; [`HttpDocumentExtractor`] is
//! the default implementation for plain-text and markdown resumes. Binary office
//! formats are rejected with [`DocumentError::UnsupportedFormat`].

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;

use crate::config::DocumentConfig;
use crate::error::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document is too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("document contains no readable text")]
    EmptyContent,

    #[error("invalid document url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for DocumentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DocumentError::DownloadFailed("request timed out".to_string())
        } else {
            DocumentError::DownloadFailed(err.to_string())
        }
    }
}

impl From<DocumentError> for Error {
    fn from(err: DocumentError) -> Self {
        Error::ExternalFetchFailed(err.to_string())
    }
}

// ============================================================================
// Extractor
// ============================================================================

#[async_trait]
pub trait DocumentTextExtractor: Send + Sync {
    /// Download the document at `url` and return its cleaned plain text
    async fn fetch_and_extract(&self, url: &str) -> Result<String, DocumentError>;
}

/// Formats recognised from the URL path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    PlainText,
    Pdf,
    Word,
    Unknown,
}

fn detect_format(path: &str) -> DocumentFormat {
    let lower = path.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext {
        "txt" | "md" | "markdown" | "text" => DocumentFormat::PlainText,
        "pdf" => DocumentFormat::Pdf,
        "doc" | "docx" => DocumentFormat::Word,
        _ => DocumentFormat::Unknown,
    }
}

/// Downloads text resumes over HTTP
pub struct HttpDocumentExtractor {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpDocumentExtractor {
    pub fn new(config: &DocumentConfig) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.download_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl DocumentTextExtractor for HttpDocumentExtractor {
    async fn fetch_and_extract(&self, url: &str) -> Result<String, DocumentError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| DocumentError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DocumentError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let format = detect_format(parsed.path());
        match format {
            DocumentFormat::Pdf => return Err(DocumentError::UnsupportedFormat("pdf".to_string())),
            DocumentFormat::Word => return Err(DocumentError::UnsupportedFormat("word".to_string())),
            _ => {}
        }

        log::info!("[document] Downloading resume from {}", parsed);

        let response = self.client.get(parsed.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DocumentError::DownloadFailed(format!("HTTP {}", status)));
        }

        if format == DocumentFormat::Unknown {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_ascii_lowercase();
            if !(content_type.starts_with("text/") || content_type.is_empty()) {
                return Err(DocumentError::UnsupportedFormat(content_type));
            }
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(DocumentError::TooLarge {
                    size: len,
                    limit: self.max_bytes,
                });
            }
        }

        // Content-Length may be missing or wrong; enforce the limit while streaming
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes {
                return Err(DocumentError::TooLarge {
                    size: body.len() as u64,
                    limit: self.max_bytes,
                });
            }
        }

        let text = clean_text(&String::from_utf8_lossy(&body));
        if text.is_empty() {
            return Err(DocumentError::EmptyContent);
        }

        log::info!(
            "[document] Extracted {} chars (~{} tokens)",
            text.chars().count(),
            estimate_tokens(&text)
        );
        Ok(text)
    }
}

// ============================================================================
// Text helpers
// ============================================================================

fn is_invisible(c: char) -> bool {
    matches!(c,
        '\u{FEFF}'
        | '\u{200B}'..='\u{200F}'
        | '\u{202A}'..='\u{202E}'
        | '\u{2060}'..='\u{206F}')
}

/// "Page 3" / "page 12" style footer
fn is_page_marker(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    match lower.strip_prefix("page") {
        Some(rest) => {
            let rest = rest.trim();
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Normalise line endings and whitespace, drop invisible characters and page
/// footers, and keep at most one blank line between paragraphs
pub fn clean_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0;
    for raw in normalized.split('\n') {
        let visible: String = raw
            .chars()
            .map(|c| if is_invisible(c) { ' ' } else { c })
            .collect();
        let line = visible.split_whitespace().collect::<Vec<_>>().join(" ");

        if is_page_marker(&line) {
            continue;
        }
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

fn is_cjk(c: char) -> bool {
    ('\u{4E00}'..='\u{9FA5}').contains(&c)
}

/// Rough token count: CJK ~1.5 chars per token, one token per Latin word,
/// ~4 chars per token for everything else
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut words = 0usize;
    let mut other = 0usize;
    let mut in_word = false;

    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            if !in_word {
                words += 1;
                in_word = true;
            }
            continue;
        }
        in_word = false;
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }

    (cjk as f64 / 1.5 + words as f64 + other as f64 / 4.0).ceil() as usize
}

/// Outcome of a resume sanity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

pub const MIN_RESUME_CHARS: usize = 100;
pub const LONG_RESUME_CHARS: usize = 20_000;

const RESUME_KEYWORDS: [&str; 22] = [
    "name", "phone", "email", "education", "university", "degree", "major", "experience",
    "project", "company", "position", "skill", "proficient", "familiar", "姓名", "电话",
    "邮箱", "教育", "工作", "项目", "技能", "经验",
];

pub fn validate_resume_content(text: &str) -> ResumeValidation {
    let length = text.chars().count();
    if length < MIN_RESUME_CHARS {
        return ResumeValidation {
            is_valid: false,
            reason: Some(format!(
                "resume text is too short ({} chars, at least {} expected)",
                length, MIN_RESUME_CHARS
            )),
            warnings: Vec::new(),
        };
    }

    let mut warnings = Vec::new();
    if length > LONG_RESUME_CHARS {
        warnings.push(format!("resume text is long ({} chars)", length));
    }

    let lower = text.to_lowercase();
    let found = RESUME_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    if found < 3 {
        warnings.push("resume may be incomplete: few common sections found".to_string());
    }

    let non_empty_lines = text.lines().filter(|l| !l.trim().is_empty()).count();
    if non_empty_lines < 5 {
        warnings.push("resume has very few lines".to_string());
    }

    ResumeValidation {
        is_valid: true,
        reason: None,
        warnings,
    }
}

/// Cut `text` to `token_budget * chars_per_token` characters when its estimated
/// token count exceeds the budget. Returns the text and whether it was cut.
pub fn truncate_to_budget(text: &str, token_budget: usize, chars_per_token: f64) -> (String, bool) {
    let tokens = estimate_tokens(text);
    if tokens <= token_budget {
        return (text.to_string(), false);
    }

    let max_chars = (token_budget as f64 * chars_per_token).floor() as usize;
    let truncated: String = text.chars().take(max_chars).collect();
    log::warn!(
        "[document] Resume truncated: ~{} tokens over budget {}, kept {} of {} chars",
        tokens,
        token_budget,
        truncated.chars().count(),
        text.chars().count()
    );
    (truncated, true)
}
