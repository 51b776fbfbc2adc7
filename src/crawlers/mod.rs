use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use scraper::{ElementRef, Selector};
use thiserror::Error;

use crate::crawlers::retry::{RetryPolicy, retry_with_backoff};
use crate::domain::hs_code::{Candidate, QueryResult};
use crate::models::config::AppConfig;

pub mod hsciq;
pub mod i5a6;
pub mod retry;

/// Failures raised while talking to a remote catalog.
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("failed to build crawler: {0}")]
    Build(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("failed to parse page: {0}")]
    Parse(String),
}

impl CrawlerError {
    /// Network errors, rate limiting and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlerError::Http(_) => true,
            CrawlerError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            CrawlerError::Build(_) | CrawlerError::Parse(_) => false,
        }
    }
}

pub type CrawlerResult<T> = Result<T, CrawlerError>;

/// A remote HS code catalog that can be searched by keyword and queried for
/// full details.
#[async_trait]
pub trait HsCodeSource: Send + Sync {
    /// Short identifier stamped into results as `data_source`.
    fn name(&self) -> &str;

    /// Searches the catalog. Nothing found is an empty vector, not an error.
    async fn search(&self, keyword: &str) -> CrawlerResult<Vec<Candidate>>;

    /// Fetches the detail record behind a candidate's reference.
    async fn fetch_detail(&self, reference: &str) -> CrawlerResult<QueryResult>;

    /// Fetches the detail record for a known code, bypassing search.
    async fn fetch_by_code(&self, code: &str) -> CrawlerResult<QueryResult>;
}

/// Builds a [`reqwest::Client`] with browser-like headers and the configured
/// timeout.
pub fn build_reqwest_client(config: &AppConfig) -> CrawlerResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );

    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| CrawlerError::Build(e.to_string()))
}

/// Fetches pages with retries and a fixed politeness delay after every
/// successful response.
pub struct PageFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl PageFetcher {
    pub fn new(client: reqwest::Client, retry: RetryPolicy, request_delay: Duration) -> Self {
        Self {
            client,
            retry,
            request_delay,
        }
    }

    pub fn from_config(config: &AppConfig) -> CrawlerResult<Self> {
        Ok(Self::new(
            build_reqwest_client(config)?,
            RetryPolicy::new(config.max_retries, config.retry_delay()),
            config.request_delay(),
        ))
    }

    /// Returns the body of `url` as text.
    pub async fn fetch_text(&self, url: &str) -> CrawlerResult<String> {
        log::debug!("GET {url}");
        let body = retry_with_backoff(url, self.retry, CrawlerError::is_retryable, || async {
            let res = self.client.get(url).send().await?;
            if !res.status().is_success() {
                return Err(CrawlerError::Status {
                    url: url.to_string(),
                    status: res.status(),
                });
            }
            Ok::<_, CrawlerError>(res.text().await?)
        })
        .await?;

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        Ok(body)
    }
}

/// Parses a CSS selector, reporting bad selectors as parse errors.
pub(crate) fn selector(css: &str) -> CrawlerResult<Selector> {
    Selector::parse(css).map_err(|e| CrawlerError::Parse(format!("selector {css}: {e:?}")))
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub(crate) fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trimmed text content of an element.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

/// Removes separators a user may type inside a code, such as dots and spaces.
pub fn normalize_hs_code(code: &str) -> String {
    code.chars()
        .filter(|c| !matches!(c, '.' | ' ' | '\u{3000}'))
        .collect()
}

/// Formats raw digits as `XXXXXXXX.XX` (10 digits) or `XXXX.XXXX` (8 digits).
///
/// Any other length is returned unchanged.
pub fn format_hs_code(code: &str) -> String {
    let digits: String = code.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => format!("{}.{}", &digits[..8], &digits[8..]),
        8 => format!("{}.{}", &digits[..4], &digits[4..]),
        _ => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_ten_and_eight_digit_codes() {
        assert_eq!(format_hs_code("0808100000"), "08081000.00");
        assert_eq!(format_hs_code("08081000"), "0808.1000");
        assert_eq!(format_hs_code("080810"), "080810");
    }

    #[test]
    fn normalizes_user_supplied_codes() {
        assert_eq!(normalize_hs_code("0808.1000 00"), "0808100000");
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  鲜苹果 \n\t 其他 "), "鲜苹果 其他");
    }

    #[test]
    fn status_errors_retry_only_when_transient() {
        let throttled = CrawlerError::Status {
            url: "u".into(),
            status: StatusCode::TOO_MANY_REQUESTS,
        };
        let missing = CrawlerError::Status {
            url: "u".into(),
            status: StatusCode::NOT_FOUND,
        };
        assert!(throttled.is_retryable());
        assert!(!missing.is_retryable());
        assert!(!CrawlerError::Parse("x".into()).is_retryable());
    }
}
