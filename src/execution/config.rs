//! What to execute: the run modes offered by the dashboard.

use serde::{Deserialize, Serialize};

/// Immutable description of one test run.
///
/// Serializes to the backend's `{"runType": ..., "config": {...}}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "runType", content = "config")]
pub enum RunConfig {
    #[serde(rename = "By Tag", rename_all = "camelCase")]
    ByTag {
        include_tags: String,
        #[serde(default)]
        exclude_tags: String,
    },
    #[serde(rename = "By Suite")]
    BySuite { suite: String },
    #[serde(rename = "By Test Case")]
    ByTestCase { testcase: String },
    /// Data-driven run over an uploaded table.
    #[serde(rename = "Orchestrator")]
    Orchestrator {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    #[serde(rename = "All")]
    All,
}

impl RunConfig {
    pub fn run_type(&self) -> &'static str {
        match self {
            RunConfig::ByTag { .. } => "By Tag",
            RunConfig::BySuite { .. } => "By Suite",
            RunConfig::ByTestCase { .. } => "By Test Case",
            RunConfig::Orchestrator { .. } => "Orchestrator",
            RunConfig::All => "All",
        }
    }

    /// Human label stored as the run record's `suite`.
    pub fn suite_label(&self) -> String {
        fn or_all(value: &str) -> &str {
            let value = value.trim();
            if value.is_empty() {
                "all"
            } else {
                value
            }
        }
        match self {
            RunConfig::ByTag { include_tags, .. } => format!("Tags: {}", or_all(include_tags)),
            RunConfig::BySuite { suite } => format!("Suite: {}", or_all(suite)),
            RunConfig::ByTestCase { testcase } => format!("Test: {}", or_all(testcase)),
            RunConfig::Orchestrator { .. } => "Orchestrator Run".to_string(),
            RunConfig::All => "All Tests".to_string(),
        }
    }

    /// Reject configurations the backend cannot act on.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RunConfig::ByTag { include_tags, .. } if include_tags.trim().is_empty() => {
                Err("include tags must not be empty".to_string())
            }
            RunConfig::BySuite { suite } if suite.trim().is_empty() => {
                Err("suite name must not be empty".to_string())
            }
            RunConfig::ByTestCase { testcase } if testcase.trim().is_empty() => {
                Err("test case name must not be empty".to_string())
            }
            RunConfig::Orchestrator { headers, rows } => {
                if headers.is_empty() {
                    return Err("orchestrator data table has no headers".to_string());
                }
                if rows.is_empty() {
                    return Err("orchestrator data table has no rows".to_string());
                }
                if let Some(i) = rows.iter().position(|r| r.len() != headers.len()) {
                    return Err(format!(
                        "orchestrator row {} has {} cells, expected {}",
                        i + 1,
                        rows[i].len(),
                        headers.len()
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
