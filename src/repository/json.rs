use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::domain::hs_code::{CodeDetails, QueryResult};
use crate::repository::{RepositoryResult, ResultReader, ResultWriter};

const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Serialize, Deserialize)]
pub struct SingleResultDocument {
    pub query_time: String,
    pub data: QueryResult,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResultDocument {
    pub query_time: String,
    pub total_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub data: Vec<QueryResult>,
}

/// Writes results as pretty-printed UTF-8 JSON files under one directory.
pub struct JsonFileRepository {
    output_dir: PathBuf,
}

impl JsonFileRepository {
    /// Creates the output directory when missing.
    pub fn new(output_dir: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write<T: Serialize>(&self, filename: &str, value: &T) -> RepositoryResult<PathBuf> {
        let path = self.output_dir.join(filename);
        let body = serde_json::to_string_pretty(value)?;
        fs::write(&path, body)?;
        Ok(path)
    }
}

fn now(format: &str) -> String {
    Local::now().format(format).to_string()
}

impl ResultWriter for JsonFileRepository {
    fn save_single(&self, result: &QueryResult) -> RepositoryResult<PathBuf> {
        let filename = if result.hs_code.is_empty() {
            format!("result_{}.json", now(FILE_STAMP_FORMAT))
        } else {
            format!("hs_{}.json", result.hs_code.replace('.', "_"))
        };
        let document = SingleResultDocument {
            query_time: now(QUERY_TIME_FORMAT),
            data: result.clone(),
        };
        let path = self.write(&filename, &document)?;
        log::info!("Saved result to {}", path.display());
        Ok(path)
    }

    fn save_batch(&self, results: &[QueryResult]) -> RepositoryResult<PathBuf> {
        let success_count = results.iter().filter(|r| r.search_success).count();
        let document = BatchResultDocument {
            query_time: now(QUERY_TIME_FORMAT),
            total_count: results.len(),
            success_count,
            failed_count: results.len() - success_count,
            data: results.to_vec(),
        };
        let filename = format!("batch_results_{}.json", now(FILE_STAMP_FORMAT));
        let path = self.write(&filename, &document)?;
        log::info!(
            "Saved batch to {}: total={}, success={}, failed={}",
            path.display(),
            document.total_count,
            document.success_count,
            document.failed_count
        );
        Ok(path)
    }

    fn export_simple(&self, results: &[QueryResult]) -> RepositoryResult<PathBuf> {
        let filename = format!("simple_results_{}.json", now(FILE_STAMP_FORMAT));
        let path = self.write(&filename, &results)?;
        log::info!("Exported {} results to {}", results.len(), path.display());
        Ok(path)
    }
}

impl ResultReader for JsonFileRepository {
    fn load(&self, path: &Path) -> RepositoryResult<serde_json::Value> {
        let body = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn or_na(value: &str) -> &str {
    if value.is_empty() { "N/A" } else { value }
}

fn push_details(lines: &mut Vec<String>, label: &str, details: &CodeDetails) {
    if details.details.is_empty() {
        return;
    }
    lines.push(format!("  {label}:"));
    for detail in &details.details {
        lines.push(format!("    - {}: {}", detail.code, detail.name));
    }
}

/// Console block for one result.
pub fn format_for_display(result: &QueryResult) -> String {
    let rule = "=".repeat(60);
    let mut lines = vec![rule.clone()];
    if let Some(query) = &result.query_product_name {
        lines.push(format!("查询商品: {query}"));
    }
    lines.push(format!("HS编码: {}", or_na(&result.hs_code)));
    lines.push(format!("商品名称: {}", or_na(&result.product_name)));
    lines.push(format!("商品描述: {}", or_na(&result.description)));
    lines.push(format!("申报要素: {}", or_na(&result.declaration_elements)));
    lines.push(format!("法定第一单位: {}", or_na(&result.first_unit)));
    lines.push(format!("法定第二单位: {}", or_na(&result.second_unit)));

    let supervision = &result.customs_supervision_conditions;
    lines.push(format!("海关监管条件: {}", or_na(&supervision.code)));
    push_details(&mut lines, "许可证或批文", supervision);

    let inspection = &result.inspection_quarantine;
    lines.push(format!("检验检疫类别: {}", or_na(&inspection.code)));
    push_details(&mut lines, "检验检疫详情", inspection);

    if let Some(source) = &result.data_source {
        lines.push(format!("数据来源: {source}"));
    }
    lines.push(format!(
        "查询状态: {}",
        if result.search_success { "成功" } else { "失败" }
    ));
    if !result.error_message.is_empty() {
        lines.push(format!("错误信息: {}", result.error_message));
    }
    lines.push(rule);
    lines.join("\n")
}
