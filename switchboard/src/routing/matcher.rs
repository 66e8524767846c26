use crate::engine::events::EventKind;
use crate::state::models::User;

use super::rules::{Destination, RoutingRule, RoutingTable};

/// Message fields the matcher looks at.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub author: &'a User,
    pub content: &'a str,
    /// Prefix found at the start of `content`, empty if none.
    pub prefix: &'a str,
    pub args: &'a [String],
    pub is_dm: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub kind: EventKind,
    pub bot_user_id: &'a str,
    /// Present for message create/update events.
    pub message: Option<MessageContext<'a>>,
}

impl RoutingTable {
    /// Destinations for an event, in rule order. Evaluation stops at the first
    /// matching rule unless that rule is flagged `always`.
    pub fn matching(&self, input: &MatchInput<'_>) -> Vec<Destination> {
        let mut destinations = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.kind == input.kind) {
            if !rule_matches(rule, input) {
                continue;
            }
            destinations.push(rule.destination.clone());
            if !rule.always {
                break;
            }
        }
        destinations
    }
}

fn rule_matches(rule: &RoutingRule, input: &MatchInput<'_>) -> bool {
    if !input.kind.is_message() {
        return true;
    }
    let Some(message) = input.message else {
        return !rule.has_requirement();
    };

    if !rule.allow_bots && message.author.bot {
        return false;
    }
    if !rule.allow_myself && message.author.id == input.bot_user_id {
        return false;
    }
    if !rule.allow_dm && message.is_dm {
        return false;
    }
    if !rule.has_requirement() {
        return true;
    }

    if !rule.do_not_prepend_prefix && message.prefix.is_empty() {
        return false;
    }

    if !rule.beginning.is_empty() {
        let Some(first) = message.args.first() else {
            return false;
        };
        let matched = if rule.case_sensitive {
            *first == rule.beginning
        } else {
            first.to_lowercase() == rule.beginning.to_lowercase()
        };
        if !matched {
            return false;
        }
    }

    if let Some(regex) = &rule.regex {
        let haystack = if rule.do_not_prepend_prefix {
            message.content
        } else {
            message
                .content
                .strip_prefix(message.prefix)
                .unwrap_or(message.content)
                .trim()
        };
        if !regex.is_match(haystack) {
            return false;
        }
    }

    true
}
