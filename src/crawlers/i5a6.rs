use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use crate::crawlers::{
    CrawlerError, CrawlerResult, HsCodeSource, PageFetcher, element_text, format_hs_code,
    normalize_hs_code, selector,
};
use crate::domain::hs_code::{Candidate, CodeDetail, CodeDetails, QueryResult};
use crate::models::config::AppConfig;

static DETAIL_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/hscode/detail/(\d+)").expect("valid regex"));
static CODE_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{8,10}").expect("valid regex"));

/// Link texts that say nothing about the product.
const PLACEHOLDER_LINK_TEXT: [&str; 3] = ["", "查看详情", "详情"];
const WITHDRAWN_MARKER: &str = "已作废";

/// Crawler for `www.i5a6.com`.
pub struct I5a6Crawler {
    base_url: Url,
    fetcher: PageFetcher,
}

impl I5a6Crawler {
    pub const NAME: &'static str = "i5a6";

    pub fn new(fetcher: PageFetcher) -> CrawlerResult<Self> {
        Ok(Self {
            base_url: Url::parse("https://www.i5a6.com/")
                .map_err(|e| CrawlerError::Build(e.to_string()))?,
            fetcher,
        })
    }

    pub fn from_config(config: &AppConfig) -> CrawlerResult<Self> {
        Self::new(PageFetcher::from_config(config)?)
    }

    fn url_with_segments(&self, segments: &[&str]) -> CrawlerResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CrawlerError::Build(format!("cannot-be-a-base URL {}", self.base_url)))?
            .clear()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl HsCodeSource for I5a6Crawler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn search(&self, keyword: &str) -> CrawlerResult<Vec<Candidate>> {
        let url = self.url_with_segments(&["hscode", "key", keyword])?;
        log::info!("Searching {} for {keyword}", Self::NAME);
        let html = self.fetcher.fetch_text(url.as_str()).await?;
        let results = parse_search_results(&html, &self.base_url)?;
        if results.is_empty() {
            log::warn!("No search results for keyword '{keyword}'");
        }
        Ok(results)
    }

    async fn fetch_detail(&self, reference: &str) -> CrawlerResult<QueryResult> {
        log::info!("Fetching detail {reference}");
        let html = self.fetcher.fetch_text(reference).await?;
        parse_detail_page(&html)
    }

    async fn fetch_by_code(&self, code: &str) -> CrawlerResult<QueryResult> {
        let url = self.url_with_segments(&["hscode", "detail", &normalize_hs_code(code)])?;
        self.fetch_detail(url.as_str()).await
    }
}

fn enclosing_row(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "tr")
}

/// Extracts candidates from a search result page.
///
/// Links to detail pages are preferred; when none exist, table rows holding
/// an 8 to 10 digit code are used instead.
pub fn parse_search_results(html: &str, base_url: &Url) -> CrawlerResult<Vec<Candidate>> {
    let document = Html::parse_document(html);
    let link_selector = selector("a[href]")?;
    let cell_selector = selector("td, th")?;

    let mut results = Vec::new();
    for link in document.select(&link_selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        // Anchored links point at declaration examples, not the code itself.
        if href.contains('#') {
            continue;
        }
        let Some(raw_code) = DETAIL_HREF.captures(href).map(|c| c[1].to_string()) else {
            continue;
        };

        let mut name = element_text(link);
        if PLACEHOLDER_LINK_TEXT.contains(&name.as_str())
            && let Some(row) = enclosing_row(link)
            && let Some(cell) = row.select(&cell_selector).nth(1)
        {
            name = element_text(cell);
        }

        let clean_href = href.split(['#', '?']).next().unwrap_or_default();
        let Ok(detail_url) = base_url.join(clean_href) else {
            log::debug!("Skipping unparsable detail link {href}");
            continue;
        };

        results.push(Candidate {
            name,
            reference: detail_url.to_string(),
            hs_code: format_hs_code(&raw_code),
        });
    }

    if results.is_empty() {
        let row_selector = selector("tr")?;
        for row in document.select(&row_selector) {
            let cells: Vec<String> = row.select(&cell_selector).map(element_text).collect();
            let Some(raw_code) = cells
                .iter()
                .find_map(|cell| CODE_IN_TEXT.find(cell).map(|m| m.as_str().to_string()))
            else {
                continue;
            };
            let name = cells.get(1).cloned().unwrap_or_default();
            let detail_url = base_url
                .join(&format!("/hscode/detail/{raw_code}"))
                .map_err(|e| CrawlerError::Parse(e.to_string()))?;
            results.push(Candidate {
                name,
                reference: detail_url.to_string(),
                hs_code: format_hs_code(&raw_code),
            });
        }
    }

    let mut seen = HashSet::new();
    results.retain(|c| !c.name.is_empty() && seen.insert((c.name.clone(), c.reference.clone())));
    log::info!("Extracted {} search results", results.len());
    Ok(results)
}

/// Reads the `{code, name}` rows of the innermost table whose text contains
/// `header`, skipping the header row.
fn detail_table(document: &Html, header: &str) -> CrawlerResult<Vec<CodeDetail>> {
    let table_selector = selector("table")?;
    let row_selector = selector("tr")?;
    let cell_selector = selector("td, th")?;

    let Some(table) = document
        .select(&table_selector)
        .filter(|table| table.text().any(|t| t.contains(header)))
        .last()
    else {
        return Ok(vec![]);
    };

    Ok(table
        .select(&row_selector)
        .skip(1)
        .filter_map(|row| {
            let mut cells = row.select(&cell_selector).map(element_text);
            let code = cells.next()?;
            let name = cells.next()?;
            (!code.is_empty() && !name.is_empty()).then_some(CodeDetail { code, name })
        })
        .collect())
}

/// Parses a detail page into a [`QueryResult`].
///
/// The page lays fields out as table rows holding one or two key/value pairs.
pub fn parse_detail_page(html: &str) -> CrawlerResult<QueryResult> {
    let document = Html::parse_document(html);
    let row_selector = selector("tr")?;
    let cell_selector = selector("td, th")?;

    let mut fields: HashMap<String, String> = HashMap::new();
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(element_text).collect();
        for pair in cells.chunks_exact(2).take(2) {
            if !pair[0].is_empty() && !pair[1].is_empty() {
                fields.insert(pair[0].clone(), pair[1].clone());
            }
        }
    }
    let field = |key: &str| fields.get(key).cloned().unwrap_or_default();

    let mut result = QueryResult {
        hs_code: field("商品编码"),
        product_name: field("商品名称"),
        description: field("商品描述"),
        declaration_elements: field("申报要素"),
        first_unit: field("法定第一单位"),
        second_unit: field("法定第二单位"),
        customs_supervision_conditions: CodeDetails {
            code: field("海关监管条件"),
            details: detail_table(&document, "许可证或批文代码")?,
        },
        inspection_quarantine: CodeDetails {
            code: field("检验检疫类别"),
            details: detail_table(&document, "检验检疫代码")?,
        },
        ..Default::default()
    };

    if result.description.is_empty() {
        result.description = result.product_name.clone();
    }

    let withdrawn = document.root_element().text().any(|t| t.contains(WITHDRAWN_MARKER));

    if !result.has_identity() {
        result.error_message = "页面数据为空，可能HS编码不完整".to_string();
    } else if withdrawn {
        result.error_message = format!("该编码{WITHDRAWN_MARKER}");
        log::debug!("Detail {} is withdrawn", result.hs_code);
    } else {
        result.search_success = true;
        log::info!(
            "Parsed HS code {} - {}",
            result.hs_code,
            result.product_name
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.i5a6.com/").expect("valid base")
    }

    #[test]
    fn search_prefers_link_text_and_skips_anchors() {
        let html = r#"
            <table>
              <tr><td><a href="/hscode/detail/0808100000">鲜苹果</a></td>
                  <td><a href="/hscode/detail/0808100000#sbsl">申报实例</a></td></tr>
              <tr><td><a href="https://www.i5a6.com/hscode/detail/2009710000?from=s">苹果汁</a></td></tr>
            </table>"#;

        let results = parse_search_results(html, &base()).expect("parse");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "鲜苹果");
        assert_eq!(results[0].hs_code, "08081000.00");
        assert_eq!(
            results[0].reference,
            "https://www.i5a6.com/hscode/detail/0808100000"
        );
        assert_eq!(
            results[1].reference,
            "https://www.i5a6.com/hscode/detail/2009710000"
        );
    }

    #[test]
    fn search_reads_name_from_row_when_link_is_placeholder() {
        let html = r#"
            <table>
              <tr><td>08061000</td><td>鲜葡萄</td><td><a href="/hscode/detail/08061000">查看详情</a></td></tr>
            </table>"#;

        let results = parse_search_results(html, &base()).expect("parse");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "鲜葡萄");
        assert_eq!(results[0].hs_code, "0806.1000");
    }

    #[test]
    fn search_falls_back_to_table_rows() {
        let html = r#"
            <table>
              <tr><th>编码</th><th>名称</th></tr>
              <tr><td>0803001200</td><td>鲜香蕉</td></tr>
            </table>"#;

        let results = parse_search_results(html, &base()).expect("parse");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "鲜香蕉");
        assert_eq!(
            results[0].reference,
            "https://www.i5a6.com/hscode/detail/0803001200"
        );
    }

    #[test]
    fn detail_page_extracts_fields_and_tables() {
        let html = r#"
            <table>
              <tr><td>商品编码</td><td>08081000.00</td><td>商品名称</td><td>鲜苹果</td></tr>
              <tr><td>申报要素</td><td>1:品名;2:品牌类型</td></tr>
              <tr><td>法定第一单位</td><td>千克</td><td>法定第二单位</td><td>无</td></tr>
              <tr><td>海关监管条件</td><td>AB</td><td>检验检疫类别</td><td>PQ</td></tr>
            </table>
            <table>
              <tr><th>许可证或批文代码</th><th>许可证或批文名称</th></tr>
              <tr><td>A</td><td>入境货物通关单</td></tr>
              <tr><td>B</td><td>出境货物通关单</td></tr>
            </table>
            <table>
              <tr><th>检验检疫代码</th><th>名称</th></tr>
              <tr><td>P</td><td>进境动植物、动植物产品检疫</td></tr>
            </table>"#;

        let result = parse_detail_page(html).expect("parse");

        assert!(result.search_success);
        assert_eq!(result.hs_code, "08081000.00");
        assert_eq!(result.product_name, "鲜苹果");
        assert_eq!(result.description, "鲜苹果");
        assert_eq!(result.second_unit, "无");
        assert_eq!(result.customs_supervision_conditions.code, "AB");
        assert_eq!(result.customs_supervision_conditions.details.len(), 2);
        assert_eq!(result.inspection_quarantine.code, "PQ");
        assert_eq!(
            result.inspection_quarantine.details,
            vec![CodeDetail {
                code: "P".into(),
                name: "进境动植物、动植物产品检疫".into()
            }]
        );
    }

    #[test]
    fn detail_page_without_identity_is_unsuccessful() {
        let result = parse_detail_page("<html><body><p>404</p></body></html>").expect("parse");

        assert!(!result.search_success);
        assert!(!result.error_message.is_empty());
    }

    #[test]
    fn withdrawn_detail_is_flagged() {
        let html = r#"
            <div class="notice">该编码已作废</div>
            <table><tr><td>商品编码</td><td>08081000.90</td><td>商品名称</td><td>旧苹果</td></tr></table>"#;

        let result = parse_detail_page(html).expect("parse");

        assert!(!result.search_success);
        assert!(result.error_message.contains("已作废"));
    }
}
