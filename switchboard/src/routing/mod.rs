//! Event routing: compiled rules, matching, and the state-aware dispatcher.

pub mod args;
pub mod dispatcher;
pub mod matcher;
pub mod rules;
