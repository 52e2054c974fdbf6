//! Shell quote-context classification for argv template placeholders.
//!
//! A single left-to-right scan tracks the three shell quote states plus a
//! one-character backslash escape flag. The escape flag is suppressed inside
//! single quotes: `'foo\'` closes the quote at the backslash-adjacent tick,
//! exactly as a POSIX shell reads it. Regex cannot express this state
//! machine, which is why the scanner is hand-written.

/// Where a placeholder sits inside a template element. Numeric order matters:
/// the minimum across all occurrences is the effective level, so the least
/// protected context wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuoteLevel {
    Unquoted = 0,
    DoubleQuoted = 1,
    SingleQuoted = 2,
    Backtick = 3,
}

/// Classify the quote context of every occurrence of `placeholder` inside
/// `template` and return the minimum level. `None` when the placeholder does
/// not occur.
pub fn analyze_quote_context(template: &str, placeholder: &str) -> Option<QuoteLevel> {
    if placeholder.is_empty() {
        return None;
    }

    let bytes = template.as_bytes();
    let needle = placeholder.as_bytes();

    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;
    let mut escaped = false;
    let mut min_level: Option<QuoteLevel> = None;

    let mut i = 0;
    while i < bytes.len() {
        if !escaped && bytes[i..].starts_with(needle) {
            let level = if in_single {
                QuoteLevel::SingleQuoted
            } else if in_backtick {
                QuoteLevel::Backtick
            } else if in_double {
                QuoteLevel::DoubleQuoted
            } else {
                QuoteLevel::Unquoted
            };
            min_level = Some(match min_level {
                Some(current) => current.min(level),
                None => level,
            });
            i += needle.len();
            continue;
        }

        let ch = bytes[i];
        if escaped {
            escaped = false;
            i += 1;
            continue;
        }

        match ch {
            // No escapes inside single quotes.
            b'\\' if !in_single => escaped = true,
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            // Backticks are inert inside single quotes but still open
            // command substitution inside double quotes.
            b'`' if !in_single => in_backtick = !in_backtick,
            _ => {}
        }
        i += 1;
    }

    min_level
}
