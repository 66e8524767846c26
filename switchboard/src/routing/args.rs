//! Command prefix detection and shell-style argument splitting.

use crate::config::PrefixConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgvError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("trailing backslash")]
    TrailingEscape,
}

/// Every prefix that can start a command in `guild_id`, in match order:
/// both bot mention forms, then the guild's own prefixes, or the default
/// prefix when the guild has none configured.
pub fn prefixes_for(config: &PrefixConfig, bot_user_id: &str, guild_id: &str) -> Vec<String> {
    let mut prefixes = vec![format!("<@{bot_user_id}>"), format!("<@!{bot_user_id}>")];
    match config.guilds.iter().find(|rule| rule.guild_id == guild_id) {
        Some(rule) => prefixes.extend(rule.prefixes.iter().cloned()),
        None => prefixes.push(config.default_prefix.clone()),
    }
    prefixes
}

/// Strip the first matching prefix and split the remainder into arguments.
/// Returns the arguments and the prefix used (empty if none matched).
/// Content that cannot be split becomes a single argument.
pub fn get_message_arguments(content: &str, prefixes: &[String]) -> (Vec<String>, String) {
    let mut rest = content;
    let mut used = String::new();
    for prefix in prefixes.iter().filter(|p| !p.is_empty()) {
        if let Some(stripped) = content.strip_prefix(prefix.as_str()) {
            rest = stripped;
            used = prefix.clone();
            break;
        }
    }

    match to_argv(rest) {
        Ok(args) => (args, used),
        Err(_) => (vec![rest.to_string()], used),
    }
}

/// Split like a POSIX shell: whitespace separates words, single quotes are
/// literal, double quotes group and allow escapes, backslash escapes the
/// next character.
pub fn to_argv(input: &str) -> Result<Vec<String>, ArgvError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(ArgvError::TrailingEscape)?;
                current.push(escaped);
                in_word = true;
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(ArgvError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars.next().ok_or(ArgvError::UnterminatedQuote('"'))?;
                            current.push(escaped);
                        }
                        Some(c) => current.push(c),
                        None => return Err(ArgvError::UnterminatedQuote('"')),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}
