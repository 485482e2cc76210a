//! Tag resolution: ordered exact / regex / blacklist passes per axis.
//!
//! Rules compile once per invocation. User-supplied patterns are untrusted:
//! a pattern that fails to compile is warned about and inert thereafter.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

use crate::athena::ResultRow;
use crate::config::Config;

/// Label for an axis none of whose candidate columns resolved.
pub const UNTAGGED: &str = "Untagged";

struct CompiledRule {
    value: String,
    matches: Vec<String>,
    regexes: Vec<Regex>,
}

struct CompiledAxis {
    name: String,
    tags: Vec<String>,
    rules: Vec<CompiledRule>,
}

/// Compiled per-invocation resolver state.
pub struct TagResolver {
    axes: Vec<CompiledAxis>,
    blacklist: HashMap<String, Vec<Regex>>,
}

impl TagResolver {
    pub fn new(config: &Config) -> Self {
        let axes = config
            .tagmap
            .iter()
            .map(|axis| CompiledAxis {
                name: axis.name.clone(),
                tags: axis.tags.clone(),
                rules: axis
                    .map
                    .iter()
                    .map(|rule| CompiledRule {
                        value: rule.value.clone(),
                        matches: rule.matches.clone(),
                        regexes: compile_patterns(&rule.regex),
                    })
                    .collect(),
            })
            .collect();
        let blacklist = config
            .tagblacklist
            .iter()
            .map(|(tag, patterns)| (tag.clone(), compile_patterns(patterns)))
            .collect();
        Self { axes, blacklist }
    }

    /// Axis names in declared order, for the report header.
    pub fn axis_names(&self) -> Vec<String> {
        self.axes.iter().map(|axis| axis.name.clone()).collect()
    }

    /// One label per axis for a result row, in declared axis order.
    pub fn labels(&self, row: &ResultRow) -> Vec<String> {
        self.axes
            .iter()
            .map(|axis| {
                axis.tags
                    .iter()
                    .find_map(|tag| {
                        let cell = row.get(tag).map(String::as_str).unwrap_or("");
                        self.resolve_cell(axis, tag, cell)
                    })
                    .unwrap_or_else(|| UNTAGGED.to_string())
            })
            .collect()
    }

    /// Resolve one cell: exact pass, regex pass, blacklist, passthrough.
    /// `None` means no match.
    fn resolve_cell(&self, axis: &CompiledAxis, tag: &str, cell: &str) -> Option<String> {
        for rule in &axis.rules {
            if rule.matches.iter().any(|candidate| candidate == cell) {
                return Some(rule.value.clone());
            }
        }
        for rule in &axis.rules {
            if rule.regexes.iter().any(|pattern| pattern.is_match(cell)) {
                return Some(rule.value.clone());
            }
        }
        if let Some(patterns) = self.blacklist.get(tag) {
            if patterns.iter().any(|pattern| pattern.is_match(cell)) {
                return None;
            }
        }
        if !cell.is_empty() {
            return Some(cell.to_string());
        }
        None
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                warn!(pattern, %error, "invalid regex, skipping");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rule, TagAxis};
    use indexmap::IndexMap;

    fn config(axes: Vec<TagAxis>, blacklist: &[(&str, &[&str])]) -> Config {
        Config {
            tagmap: axes,
            tagblacklist: blacklist
                .iter()
                .map(|(tag, patterns)| {
                    (
                        tag.to_string(),
                        patterns.iter().map(|p| p.to_string()).collect(),
                    )
                })
                .collect(),
            sql: IndexMap::new(),
        }
    }

    fn axis(name: &str, tags: &[&str], rules: Vec<Rule>) -> TagAxis {
        TagAxis {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            map: rules,
        }
    }

    fn rule(value: &str, matches: &[&str], regex: &[&str]) -> Rule {
        Rule {
            value: value.to_string(),
            matches: matches.iter().map(|m| m.to_string()).collect(),
            regex: regex.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn row(cells: &[(&str, &str)]) -> ResultRow {
        cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_match_beats_regex_regardless_of_rule_order() {
        let resolver = TagResolver::new(&config(
            vec![axis(
                "Team",
                &["tag"],
                vec![
                    rule("P", &[], &["alpha.*"]),
                    rule("Q", &["alphabet"], &[]),
                ],
            )],
            &[],
        ));
        assert_eq!(resolver.labels(&row(&[("tag", "alphabet")])), vec!["Q"]);
    }

    #[test]
    fn test_earlier_rules_win_within_a_pass() {
        let resolver = TagResolver::new(&config(
            vec![axis(
                "Team",
                &["tag"],
                vec![rule("first", &["x"], &[]), rule("second", &["x"], &[])],
            )],
            &[],
        ));
        assert_eq!(resolver.labels(&row(&[("tag", "x")])), vec!["first"]);

        let resolver = TagResolver::new(&config(
            vec![axis(
                "Team",
                &["tag"],
                vec![rule("first", &[], &["^x"]), rule("second", &[], &["^x"])],
            )],
            &[],
        ));
        assert_eq!(resolver.labels(&row(&[("tag", "xy")])), vec!["first"]);
    }

    #[test]
    fn test_blacklist_beats_passthrough() {
        let resolver = TagResolver::new(&config(
            vec![axis("Team", &["resourceid"], vec![])],
            &[("resourceid", &["^i-"])],
        ));
        // A blacklisted non-empty cell resolves to no match, hence Untagged.
        assert_eq!(
            resolver.labels(&row(&[("resourceid", "i-abc")])),
            vec![UNTAGGED]
        );
        // A non-blacklisted cell passes through.
        assert_eq!(
            resolver.labels(&row(&[("resourceid", "vol-abc")])),
            vec!["vol-abc"]
        );
    }

    #[test]
    fn test_rule_match_beats_blacklist() {
        let resolver = TagResolver::new(&config(
            vec![axis(
                "Team",
                &["resourceid"],
                vec![rule("Known", &["i-abc"], &[])],
            )],
            &[("resourceid", &["^i-"])],
        ));
        assert_eq!(
            resolver.labels(&row(&[("resourceid", "i-abc")])),
            vec!["Known"]
        );
    }

    #[test]
    fn test_empty_candidates_fall_back_to_untagged() {
        let resolver = TagResolver::new(&config(
            vec![axis("Team", &["a", "b"], vec![])],
            &[],
        ));
        assert_eq!(
            resolver.labels(&row(&[("a", ""), ("b", "")])),
            vec![UNTAGGED]
        );
        // Missing columns behave like empty cells.
        assert_eq!(resolver.labels(&row(&[])), vec![UNTAGGED]);
    }

    #[test]
    fn test_candidate_columns_try_in_order() {
        let resolver = TagResolver::new(&config(
            vec![axis("Team", &["primary", "fallback"], vec![])],
            &[],
        ));
        assert_eq!(
            resolver.labels(&row(&[("primary", ""), ("fallback", "ops")])),
            vec!["ops"]
        );
        assert_eq!(
            resolver.labels(&row(&[("primary", "dev"), ("fallback", "ops")])),
            vec!["dev"]
        );
    }

    #[test]
    fn test_axes_resolve_in_declared_order() {
        let resolver = TagResolver::new(&config(
            vec![
                axis("Team", &["team"], vec![]),
                axis("Env", &["env"], vec![]),
            ],
            &[],
        ));
        assert_eq!(resolver.axis_names(), vec!["Team", "Env"]);
        assert_eq!(
            resolver.labels(&row(&[("team", "data"), ("env", "prod")])),
            vec!["data", "prod"]
        );
    }

    #[test]
    fn test_invalid_regex_is_inert_but_others_still_fire() {
        let resolver = TagResolver::new(&config(
            vec![axis(
                "Team",
                &["tag"],
                vec![rule("R", &[], &["([unclosed", "^good-"])],
            )],
            &[],
        ));
        assert_eq!(resolver.labels(&row(&[("tag", "good-1")])), vec!["R"]);
        // The broken pattern matches nothing; the cell passes through.
        assert_eq!(
            resolver.labels(&row(&[("tag", "([unclosed")])),
            vec!["([unclosed"]
        );
    }
}
