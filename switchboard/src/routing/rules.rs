//! Routing rule compilation.
//!
//! A routing document is a list of entries. Each entry names the event kinds
//! it handles and the destination module that should receive them:
//!
//! ```text
//! [{ "active": true, "kinds": ["MESSAGE_CREATE"], "module": "stats",
//!    "requirements": [{ "beginning": "stats" }], "priority": 10 }]
//! ```
//!
//! Compilation orders entries by priority (higher first, declared order within
//! a priority) and expands every entry into one rule per kind, and for
//! message kinds one rule per requirement.

use std::cmp::Reverse;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::events::EventKind;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("failed to read routing document: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid routing JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid routing TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    Lambda,
    Sqs,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandler {
    Sentry,
    Discord,
}

/// A routed-to downstream handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "type")]
    pub kind: DestinationKind,
    pub name: String,
    pub error_handlers: Vec<ErrorHandler>,
    /// Alias of the requirement that matched, empty otherwise.
    pub alias: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRequirement {
    /// First argument must equal this. Empty matches all.
    pub beginning: String,
    /// Must match the message remainder. Empty matches all.
    pub regex: String,
    /// Match without requiring a command prefix.
    pub do_not_prepend_prefix: bool,
    pub case_sensitive: bool,
    pub alias: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRoutingEntry {
    pub active: bool,
    #[serde(alias = "type")]
    pub kinds: Vec<EventKind>,
    #[serde(alias = "function")]
    pub module: String,
    pub destination: DestinationKind,
    pub error_handlers: Vec<ErrorHandler>,
    /// Only applied to message kinds.
    pub requirements: Vec<RawRequirement>,
    /// Keep evaluating lower rules after this one matches.
    pub always: bool,
    pub allow_bots: bool,
    pub allow_myself: bool,
    #[serde(alias = "allow_dms")]
    pub allow_dm: bool,
    /// Higher runs first.
    pub priority: i32,
}

#[derive(Deserialize)]
struct TomlDocument {
    #[serde(default)]
    routes: Vec<RawRoutingEntry>,
}

/// One compiled (kind, requirement) rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub kind: EventKind,
    pub destination: Destination,
    pub beginning: String,
    pub regex: Option<Regex>,
    pub do_not_prepend_prefix: bool,
    pub case_sensitive: bool,
    pub always: bool,
    pub allow_bots: bool,
    pub allow_myself: bool,
    pub allow_dm: bool,
}

impl RoutingRule {
    /// Rules without a beginning or regex match any message, prefixed or not.
    pub fn has_requirement(&self) -> bool {
        !self.beginning.is_empty() || self.regex.is_some()
    }
}

/// Compiled, priority-ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub(crate) rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn compile(mut entries: Vec<RawRoutingEntry>) -> Self {
        // stable: declared order is kept within a priority
        entries.sort_by_key(|entry| Reverse(entry.priority));

        let mut rules = Vec::new();
        for entry in entries {
            if !entry.active || entry.kinds.is_empty() || entry.module.is_empty() {
                continue;
            }
            for &kind in &entry.kinds {
                let base = RoutingRule {
                    kind,
                    destination: Destination {
                        kind: entry.destination,
                        name: entry.module.clone(),
                        error_handlers: entry.error_handlers.clone(),
                        alias: String::new(),
                    },
                    beginning: String::new(),
                    regex: None,
                    do_not_prepend_prefix: false,
                    case_sensitive: false,
                    always: entry.always,
                    allow_bots: entry.allow_bots,
                    allow_myself: entry.allow_myself,
                    allow_dm: entry.allow_dm,
                };

                if !kind.is_message() || entry.requirements.is_empty() {
                    rules.push(base);
                    continue;
                }

                for requirement in &entry.requirements {
                    let regex = match compile_regex(requirement) {
                        Ok(regex) => regex,
                        Err(e) => {
                            warn!(
                                module = %entry.module,
                                regex = %requirement.regex,
                                error = %e,
                                "skipping routing requirement with invalid regex"
                            );
                            continue;
                        }
                    };
                    let mut rule = base.clone();
                    rule.beginning = requirement.beginning.clone();
                    rule.regex = regex;
                    rule.do_not_prepend_prefix = requirement.do_not_prepend_prefix;
                    rule.case_sensitive = requirement.case_sensitive;
                    rule.destination.alias = requirement.alias.clone();
                    rules.push(rule);
                }
            }
        }

        info!(rules = rules.len(), "routing table compiled");
        Self { rules }
    }

    /// Compile from a JSON array of entries.
    pub fn from_json(document: &str) -> Result<Self, RoutingError> {
        let entries: Vec<RawRoutingEntry> = serde_json::from_str(document)?;
        Ok(Self::compile(entries))
    }

    /// Compile from a TOML document of `[[routes]]` tables.
    pub fn from_toml(document: &str) -> Result<Self, RoutingError> {
        let document: TomlDocument = toml::from_str(document)?;
        Ok(Self::compile(document.routes))
    }

    /// Load a routing file; `.toml` files are TOML, anything else JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoutingError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml(&document)
        } else {
            Self::from_json(&document)
        }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_regex(requirement: &RawRequirement) -> Result<Option<Regex>, regex::Error> {
    if requirement.regex.is_empty() {
        return Ok(None);
    }
    let pattern = if requirement.case_sensitive {
        requirement.regex.clone()
    } else {
        format!("(?i){}", requirement.regex)
    };
    Regex::new(&pattern).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(module: &str, kinds: &[EventKind], priority: i32) -> RawRoutingEntry {
        RawRoutingEntry {
            active: true,
            kinds: kinds.to_vec(),
            module: module.into(),
            priority,
            ..Default::default()
        }
    }

    fn names(table: &RoutingTable) -> Vec<&str> {
        table
            .rules()
            .iter()
            .map(|r| r.destination.name.as_str())
            .collect()
    }

    #[test]
    fn test_sorted_by_priority_stable() {
        let table = RoutingTable::compile(vec![
            entry("low", &[EventKind::GuildCreate], 1),
            entry("high-a", &[EventKind::GuildCreate], 5),
            entry("mid", &[EventKind::GuildCreate], 3),
            entry("high-b", &[EventKind::GuildCreate], 5),
        ]);
        assert_eq!(names(&table), vec!["high-a", "high-b", "mid", "low"]);
    }

    #[test]
    fn test_skips_inactive_empty_kinds_and_module() {
        let mut inactive = entry("inactive", &[EventKind::GuildCreate], 0);
        inactive.active = false;
        let table = RoutingTable::compile(vec![
            inactive,
            entry("no-kinds", &[], 0),
            entry("", &[EventKind::GuildCreate], 0),
            entry("ok", &[EventKind::GuildCreate], 0),
        ]);
        assert_eq!(names(&table), vec!["ok"]);
    }

    #[test]
    fn test_expands_kinds_and_requirements() {
        let mut e = entry(
            "cmd",
            &[EventKind::MessageCreate, EventKind::GuildCreate],
            0,
        );
        e.requirements = vec![
            RawRequirement {
                beginning: "ping".into(),
                alias: "p".into(),
                ..Default::default()
            },
            RawRequirement {
                beginning: "pong".into(),
                ..Default::default()
            },
        ];
        let table = RoutingTable::compile(vec![e]);
        assert_eq!(table.len(), 3);
        let rules = table.rules();
        assert_eq!(rules[0].beginning, "ping");
        assert_eq!(rules[0].destination.alias, "p");
        assert_eq!(rules[1].beginning, "pong");
        // Requirements never apply to non-message kinds
        assert_eq!(rules[2].kind, EventKind::GuildCreate);
        assert!(!rules[2].has_requirement());
    }

    #[test]
    fn test_regex_case_insensitive_by_default() {
        let mut e = entry("r", &[EventKind::MessageCreate], 0);
        e.requirements = vec![
            RawRequirement {
                regex: "^hello".into(),
                ..Default::default()
            },
            RawRequirement {
                regex: "^hello".into(),
                case_sensitive: true,
                ..Default::default()
            },
        ];
        let table = RoutingTable::compile(vec![e]);
        let rules = table.rules();
        assert!(rules[0].regex.as_ref().unwrap().is_match("HELLO there"));
        assert!(!rules[1].regex.as_ref().unwrap().is_match("HELLO there"));
    }

    #[test]
    fn test_invalid_regex_skips_requirement_only() {
        let mut e = entry("r", &[EventKind::MessageCreate], 0);
        e.requirements = vec![
            RawRequirement {
                regex: "(unclosed".into(),
                ..Default::default()
            },
            RawRequirement {
                beginning: "fine".into(),
                ..Default::default()
            },
        ];
        let table = RoutingTable::compile(vec![e]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rules()[0].beginning, "fine");
    }

    #[test]
    fn test_from_json() {
        let table = RoutingTable::from_json(
            r#"[{
                "active": true,
                "kinds": ["MESSAGE_CREATE"],
                "module": "stats",
                "destination": "sqs",
                "error_handlers": ["sentry", "discord"],
                "requirements": [{"beginning": "stats"}],
                "priority": 2
            }]"#,
        )
        .unwrap();
        let rule = &table.rules()[0];
        assert_eq!(rule.destination.kind, DestinationKind::Sqs);
        assert_eq!(
            rule.destination.error_handlers,
            vec![ErrorHandler::Sentry, ErrorHandler::Discord]
        );
    }

    #[test]
    fn test_from_json_accepts_legacy_field_names() {
        let table = RoutingTable::from_json(
            r#"[{"active": true, "type": ["GUILD_CREATE"], "function": "greeter"}]"#,
        )
        .unwrap();
        assert_eq!(names(&table), vec!["greeter"]);
    }

    #[test]
    fn test_from_toml() {
        let table = RoutingTable::from_toml(
            r#"
            [[routes]]
            active = true
            kinds = ["GUILD_MEMBER_ADD"]
            module = "welcome"
            destination = "queue"
            "#,
        )
        .unwrap();
        assert_eq!(table.rules()[0].destination.kind, DestinationKind::Queue);
    }

    #[test]
    fn test_unparsable_document_fails() {
        assert!(matches!(
            RoutingTable::from_json("{not json"),
            Err(RoutingError::Json(_))
        ));
        assert!(matches!(
            RoutingTable::from_toml("routes = 3"),
            Err(RoutingError::Toml(_))
        ));
        assert!(matches!(
            RoutingTable::load("/nonexistent/routing.json"),
            Err(RoutingError::Io(_))
        ));
    }
}
