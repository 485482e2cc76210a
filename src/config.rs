//! Attribution configuration: tag axes, blacklist, and SQL templates.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use snafu::prelude::*;

use crate::error::{ConfigError, DecodeSnafu, EmptyTagMapSnafu, MissingSqlSnafu, ReadFileSnafu};

/// One labelling rule: exact matches take priority over regex matches.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// Group label this rule resolves to.
    pub value: String,
    /// Literal cell values that select this rule.
    #[serde(rename = "match", default)]
    pub matches: Vec<String>,
    /// Regex patterns that select this rule.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// One output dimension, resolved from an ordered list of candidate
/// CUR columns through an ordered rule list.
#[derive(Debug, Clone, Deserialize)]
pub struct TagAxis {
    /// Column label in the report header.
    pub name: String,
    /// Candidate raw CUR column names, tried in order.
    pub tags: Vec<String>,
    /// Rules, tried in order within each match pass.
    pub map: Vec<Rule>,
}

/// Attribution config: `{tagmap, tagblacklist, sql}`.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub tagmap: Vec<TagAxis>,
    /// Per-column regex patterns that force a cell to no-match.
    #[serde(default)]
    pub tagblacklist: HashMap<String, Vec<String>>,
    /// Named SQL templates (tagmap, ricost, riusage).
    pub sql: IndexMap<String, String>,
}

impl Config {
    /// Load and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.to_path_buf(),
        })?;
        let config: Config = serde_json::from_str(&body).context(DecodeSnafu {
            path: path.to_path_buf(),
        })?;
        ensure!(!config.tagmap.is_empty(), EmptyTagMapSnafu);
        Ok(config)
    }

    /// Look up a named SQL template.
    pub fn sql(&self, name: &str) -> Result<&str, ConfigError> {
        self.sql
            .get(name)
            .map(String::as_str)
            .context(MissingSqlSnafu { name })
    }

    /// Every candidate column across all axes, quoted and comma-joined for
    /// the `**TAGS**` token.
    pub fn tags_clause(&self) -> String {
        self.tagmap
            .iter()
            .flat_map(|axis| axis.tags.iter())
            .map(|tag| format!("\"{tag}\""))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        let body = r#"{
            "sql": {
                "tagmap": "SELECT **TAGS** FROM **DB**.**TABLE**",
                "ricost": "SELECT service, cost FROM **DB**.**TABLE**",
                "riusage": "SELECT **TAGS** FROM **DB**.**TABLE**"
            },
            "tagblacklist": {
                "resourceid": ["^i-"]
            },
            "tagmap": [
                {
                    "name": "Team",
                    "tags": ["resourcetags/user_team", "resourcetags/user_owner"],
                    "map": [
                        {"value": "Platform", "match": ["platform", "infra"], "regex": []},
                        {"value": "Data", "match": [], "regex": ["^data-.*"]}
                    ]
                }
            ]
        }"#;
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_config_decodes_the_documented_shape() {
        let config = sample();
        assert_eq!(config.tagmap.len(), 1);
        assert_eq!(config.tagmap[0].name, "Team");
        assert_eq!(config.tagmap[0].tags.len(), 2);
        assert_eq!(config.tagmap[0].map[0].matches, vec!["platform", "infra"]);
        assert_eq!(config.tagmap[0].map[1].regex, vec!["^data-.*"]);
        assert_eq!(config.tagblacklist["resourceid"], vec!["^i-"]);
    }

    #[test]
    fn test_sql_lookup_errors_on_missing_template() {
        let config = sample();
        assert!(config.sql("tagmap").is_ok());
        assert!(matches!(
            config.sql("nope"),
            Err(ConfigError::MissingSql { .. })
        ));
    }

    #[test]
    fn test_tags_clause_quotes_all_candidates() {
        let config = sample();
        assert_eq!(
            config.tags_clause(),
            "\"resourcetags/user_team\",\"resourcetags/user_owner\""
        );
    }

    #[test]
    fn test_rule_lists_default_to_empty() {
        let body = r#"{
            "sql": {"tagmap": "q"},
            "tagmap": [{"name": "Env", "tags": ["t"], "map": [{"value": "prod"}]}]
        }"#;
        let config: Config = serde_json::from_str(body).unwrap();
        assert!(config.tagmap[0].map[0].matches.is_empty());
        assert!(config.tagmap[0].map[0].regex.is_empty());
        assert!(config.tagblacklist.is_empty());
    }
}
