use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use crate::crawlers::{
    CrawlerError, CrawlerResult, HsCodeSource, PageFetcher, clean_text, element_text,
    format_hs_code, normalize_hs_code, selector,
};
use crate::domain::hs_code::{Candidate, CodeDetail, CodeDetails, QueryResult};
use crate::models::config::AppConfig;

static TEN_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{10}").expect("valid regex"));
static CODE_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Code/(\d{10})").expect("valid regex"));
static REQUIRED_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(必填|非必填)$").expect("valid regex"));

const OBSOLETE_MARKERS: [&str; 2] = ["已作废", "过期"];

/// Crawler for `hsciq.com`. Obsolete codes are filtered server side through
/// the `filterFailureCode` parameter and again while parsing.
pub struct HsciqCrawler {
    base_url: Url,
    fetcher: PageFetcher,
}

impl HsciqCrawler {
    pub const NAME: &'static str = "hsciq";

    pub fn new(fetcher: PageFetcher) -> CrawlerResult<Self> {
        Ok(Self {
            base_url: Url::parse("https://hsciq.com/")
                .map_err(|e| CrawlerError::Build(e.to_string()))?,
            fetcher,
        })
    }

    pub fn from_config(config: &AppConfig) -> CrawlerResult<Self> {
        Self::new(PageFetcher::from_config(config)?)
    }

    fn search_url(&self, keyword: &str) -> CrawlerResult<Url> {
        let mut url = self
            .base_url
            .join("HSCN/Search")
            .map_err(|e| CrawlerError::Build(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("keywords", keyword)
            .append_pair("viewtype", "1")
            .append_pair("filterFailureCode", "true");
        Ok(url)
    }
}

#[async_trait]
impl HsCodeSource for HsciqCrawler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn search(&self, keyword: &str) -> CrawlerResult<Vec<Candidate>> {
        let url = self.search_url(keyword)?;
        log::info!("Searching {} for {keyword}", Self::NAME);
        let html = self.fetcher.fetch_text(url.as_str()).await?;
        let results = parse_search_results(&html, &self.base_url)?;
        if results.is_empty() {
            log::warn!("No {} search results for '{keyword}'", Self::NAME);
        }
        Ok(results)
    }

    async fn fetch_detail(&self, reference: &str) -> CrawlerResult<QueryResult> {
        log::info!("Fetching {} detail {reference}", Self::NAME);
        let html = self.fetcher.fetch_text(reference).await?;
        parse_detail_page(&html, reference)
    }

    async fn fetch_by_code(&self, code: &str) -> CrawlerResult<QueryResult> {
        let url = self
            .base_url
            .join(&format!("HSCN/Code/{}", normalize_hs_code(code)))
            .map_err(|e| CrawlerError::Build(e.to_string()))?;
        self.fetch_detail(url.as_str()).await
    }
}

/// Extracts non-obsolete candidates from a search result page.
///
/// Each result renders the code as a link; the product name is the rest of
/// the link's parent text.
pub fn parse_search_results(html: &str, base_url: &Url) -> CrawlerResult<Vec<Candidate>> {
    let document = Html::parse_document(html);
    let link_selector = selector(r#"a[href*="/HSCN/Code/"]"#)?;

    let mut results = Vec::new();
    for link in document.select(&link_selector) {
        let hs_code = element_text(link);
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Ok(detail_url) = base_url.join(href) else {
            continue;
        };
        let Some(parent) = link.parent().and_then(ElementRef::wrap) else {
            continue;
        };

        let full_text = element_text(parent);
        if OBSOLETE_MARKERS.iter().any(|m| full_text.contains(m)) {
            log::debug!("Skipping obsolete entry {hs_code}");
            continue;
        }

        let mut name = clean_text(&full_text.replace(&hs_code, "").replace("[税目]", ""));
        if name.is_empty()
            && let Some(next) = link.next_sibling()
            && let Some(text) = next.value().as_text()
        {
            name = clean_text(text);
        }

        if !hs_code.is_empty() && !name.is_empty() {
            results.push(Candidate {
                name,
                reference: detail_url.to_string(),
                hs_code,
            });
        }
    }

    log::info!("Extracted {} valid {} results", results.len(), HsciqCrawler::NAME);
    Ok(results)
}

fn strip_label(text: &str) -> String {
    text.replace([':', '：'], "").trim().to_string()
}

/// Finds the first `h6` whose text contains `title`.
fn section_heading<'a>(document: &'a Html, title: &str) -> CrawlerResult<Option<ElementRef<'a>>> {
    let h6_selector = selector("h6")?;
    Ok(document
        .select(&h6_selector)
        .find(|h6| h6.text().any(|t| t.contains(title))))
}

/// Reads `{code, name}` rows from the table that shares a parent with the
/// `h6` section titled `title`.
fn section_codes(document: &Html, title: &str) -> CrawlerResult<CodeDetails> {
    let table_selector = selector("table")?;
    let row_selector = selector("tr")?;
    let td_selector = selector("td")?;

    let Some(table) = section_heading(document, title)?
        .and_then(|h6| h6.parent())
        .and_then(ElementRef::wrap)
        .and_then(|parent| parent.select(&table_selector).next())
    else {
        return Ok(CodeDetails::default());
    };

    let details: Vec<CodeDetail> = table
        .select(&row_selector)
        .filter_map(|row| {
            let mut cells = row.select(&td_selector).map(element_text);
            let code = cells.next()?;
            let name = cells.next()?;
            (!code.is_empty() && !name.is_empty()).then_some(CodeDetail { code, name })
        })
        .collect();

    Ok(CodeDetails {
        code: details.iter().map(|d| d.code.as_str()).collect(),
        details,
    })
}

/// Builds `index:element` pairs from the table following the `申报要素`
/// heading.
fn declaration_elements(document: &Html) -> CrawlerResult<String> {
    let table_selector = selector("table")?;
    let row_selector = selector("tr")?;
    let cell_selector = selector("td, th")?;
    let Some(heading) = section_heading(document, "申报要素")? else {
        return Ok(String::new());
    };

    // The table is the first one after the heading in document order.
    let Some(table) = heading
        .next_siblings()
        .chain(heading.ancestors().flat_map(|a| a.next_siblings()))
        .filter_map(ElementRef::wrap)
        .find_map(|el| {
            if el.value().name() == "table" {
                Some(el)
            } else {
                el.select(&table_selector).next()
            }
        })
    else {
        return Ok(String::new());
    };

    let elements: Vec<String> = table
        .select(&row_selector)
        .filter_map(|row| {
            let mut cells = row.select(&cell_selector).map(element_text);
            let index = cells.next()?;
            let text = cells.next()?.replace("[?]", "");
            let text = REQUIRED_SUFFIX.replace(&text, "").trim().to_string();
            (!index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) && !text.is_empty())
                .then(|| format!("{index}:{text}"))
        })
        .collect();

    Ok(elements.join(";"))
}

/// Parses a detail page. `url` is used to recover the code when the page
/// heading lacks it.
pub fn parse_detail_page(html: &str, url: &str) -> CrawlerResult<QueryResult> {
    let document = Html::parse_document(html);
    let heading_selector = selector("h1, h2")?;
    let row_selector = selector("tr")?;
    let cell_selector = selector("th, td")?;
    let label_selector = selector("strong, label, dt")?;

    let mut result = QueryResult::default();

    if let Some(heading) = document.select(&heading_selector).next()
        && let Some(code) = TEN_DIGITS.find(&element_text(heading))
    {
        result.hs_code = format_hs_code(code.as_str());
    }
    if result.hs_code.is_empty()
        && let Some(captures) = CODE_IN_URL.captures(url)
    {
        result.hs_code = format_hs_code(&captures[1]);
    }

    let mut fields: HashMap<String, String> = HashMap::new();
    for row in document.select(&row_selector) {
        let mut cells = row.select(&cell_selector).map(element_text);
        if let (Some(key), Some(value)) = (cells.next(), cells.next()) {
            let key = strip_label(&key);
            if !key.is_empty() && !value.is_empty() {
                fields.insert(key, value);
            }
        }
    }
    for label in document.select(&label_selector) {
        let label_text = strip_label(&element_text(label));
        if label_text.is_empty() {
            continue;
        }
        let value = match label.next_siblings().find_map(ElementRef::wrap) {
            Some(sibling) => element_text(sibling),
            None => label
                .parent()
                .and_then(ElementRef::wrap)
                .map(|parent| strip_label(&element_text(parent).replace(&label_text, "")))
                .unwrap_or_default(),
        };
        if !value.is_empty() {
            fields.insert(label_text, value);
        }
    }
    let first_of = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| fields.get(*key).filter(|v| !v.is_empty()).cloned())
    };

    result.product_name = first_of(&["商品名称", "品名"]).unwrap_or_default();
    result.description = first_of(&["商品描述"]).unwrap_or_else(|| result.product_name.clone());
    result.declaration_elements = declaration_elements(&document)?;
    result.first_unit =
        first_of(&["第一法定单位", "法定第一单位", "第一单位"]).unwrap_or_default();
    result.second_unit = first_of(&["第二法定单位", "法定第二单位", "第二单位"])
        .unwrap_or_else(|| "无".to_string());
    result.customs_supervision_conditions = section_codes(&document, "监管条件")?;
    result.inspection_quarantine = section_codes(&document, "检验检疫")?;

    if result.has_identity() {
        result.search_success = true;
        log::info!(
            "Parsed {} detail: {} - {}",
            HsciqCrawler::NAME,
            result.hs_code,
            result.product_name
        );
    } else {
        log::warn!("Detail page has neither code nor name: {url}");
        result.error_message = "未找到该HS编码的详细信息".to_string();
    }

    Ok(result)
}
