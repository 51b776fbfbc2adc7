use serde::{Deserialize, Serialize};

/// A single `{code, name}` pair attached to a regulatory or inspection code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDetail {
    pub code: String,
    pub name: String,
}

/// Short code string plus the list of details it expands to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDetails {
    pub code: String,
    pub details: Vec<CodeDetail>,
}

/// Which role produced a result in dual-source mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMethod {
    Primary,
    Fallback,
    Failed,
}

/// Structured outcome of one HS code query.
///
/// The serialized field names are the persisted/exported contract and must
/// not change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_product_name: Option<String>,
    pub hs_code: String,
    pub product_name: String,
    pub description: String,
    pub declaration_elements: String,
    pub first_unit: String,
    pub second_unit: String,
    pub customs_supervision_conditions: CodeDetails,
    pub inspection_quarantine: CodeDetails,
    pub search_success: bool,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_method: Option<QueryMethod>,
}

impl QueryResult {
    /// An empty, unsuccessful result carrying `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            ..Default::default()
        }
    }

    /// Detail collaborators must fill at least one of code or name.
    pub fn has_identity(&self) -> bool {
        !self.hs_code.is_empty() || !self.product_name.is_empty()
    }

    /// Returns true when any of the textual fields carries one of `markers`.
    pub fn contains_marker(&self, markers: &[&str]) -> bool {
        [&self.product_name, &self.description, &self.error_message]
            .iter()
            .any(|field| markers.iter().any(|marker| field.contains(marker)))
    }
}

/// One entry of a keyword search on a remote catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Human-readable label compared against the query.
    pub name: String,
    /// Opaque handle the source needs to fetch the detail page.
    pub reference: String,
    pub hs_code: String,
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.name
    }
}
