//! Per-context substitution rules and interpreter overlays.
//!
//! [`CommandAnalyzer`] is built once per command tool from the argv template
//! and consulted for every substituted value. Check order: the recursion
//! guard and path/scheme/argument overlays first, then the dangerous-argv
//! position gate, then quote-level character rules, then interpreter
//! overlays, and finally the strict-command `=` rule. Quoting alone is not
//! trusted: many templates feed a command that is itself an interpreter, so
//! interpreter overlays apply even inside single quotes.

use std::collections::HashSet;

use crate::error::{Error, Result};

use super::interpreter::{
    detect_interpreter, identify_dangerous_positions, normalize_base, requires_strict_checks,
    Interpreter,
};
use super::quote::{analyze_quote_context, QuoteLevel};

/// Characters rejected in unquoted and backtick contexts.
const DANGEROUS_CHARS: &[char] = &[
    ';', '|', '&', '$', '`', '(', ')', '{', '}', '!', '<', '>', '"', '\n', '\r', '\t', '\x0b',
    '\x0c', '*', '?', '[', ']', '~', '#', '%', '^', '\'', '\\', ' ',
];

/// Substrings rejected inside single quotes: the surrounding command may
/// itself hand the value to an interpreter, so process-spawning calls are
/// banned outright. Compared case-insensitively with whitespace stripped.
const SINGLE_QUOTE_BANNED_CALLS: &[&str] = &["system(", "exec(", "popen(", "eval("];

/// Analyzer for one argv template, reusable across calls.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    argv: Vec<String>,
    base: String,
    interpreter: Option<Interpreter>,
    strict: bool,
    dangerous_positions: HashSet<usize>,
    in_container: bool,
}

impl CommandAnalyzer {
    pub fn new(argv: &[String], in_container: bool) -> Self {
        let base = argv.first().map(|c| normalize_base(c)).unwrap_or_default();
        let interpreter = detect_interpreter(&base);
        let dangerous_positions = identify_dangerous_positions(argv, interpreter);
        Self {
            argv: argv.to_vec(),
            strict: requires_strict_checks(&base),
            base,
            interpreter,
            dangerous_positions,
            in_container,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn interpreter(&self) -> Option<Interpreter> {
        self.interpreter
    }

    /// Argv template indices whose placeholders would receive code.
    pub fn dangerous_positions(&self) -> &HashSet<usize> {
        &self.dangerous_positions
    }

    /// Validate a value destined for `{{parameter}}`.
    pub fn validate_value(
        &self,
        parameter: &str,
        value: &str,
        allow_code_substitution: bool,
    ) -> Result<()> {
        validate_common(parameter, value, self.in_container)?;

        let placeholder = format!("{{{{{parameter}}}}}");
        let occurrences: Vec<(usize, &String)> = self
            .argv
            .iter()
            .enumerate()
            .filter(|(_, element)| element.contains(&placeholder))
            .collect();

        if !allow_code_substitution {
            for (index, _) in &occurrences {
                if self.dangerous_positions.contains(index) {
                    return Err(Error::TemplateSubstitutionForbidden {
                        position: format!("argv[{index}] of {}", self.base),
                    });
                }
            }
        }

        let mut levels: Vec<QuoteLevel> = occurrences
            .iter()
            .filter_map(|(_, element)| analyze_quote_context(element, &placeholder))
            .collect();
        if levels.is_empty() {
            levels.push(QuoteLevel::Unquoted);
        }

        // cmd.exe does not honor single quotes.
        if self.interpreter == Some(Interpreter::WindowsShell) {
            for level in levels.iter_mut() {
                if *level == QuoteLevel::SingleQuoted {
                    *level = QuoteLevel::Unquoted;
                }
            }
        }

        // The minimum is the effective classification, but every occurrence
        // must individually survive its own context's rules: a value that is
        // safe double-quoted can still break out of a single-quoted twin.
        levels.sort_unstable();
        levels.dedup();
        let min_level = levels[0];
        for level in &levels {
            self.check_level_rules(parameter, value, *level)?;
        }
        self.check_interpreter_overlays(parameter, value, min_level, &occurrences)?;

        // Commands whose arguments are interpreted downstream additionally
        // reject `=` in unquoted positions (variable and config injection,
        // `env VAR=...`, `git -c key=cmd`).
        if self.strict && min_level == QuoteLevel::Unquoted && value.contains('=') {
            return Err(Error::ShellInjection {
                parameter: parameter.to_string(),
                reason: format!(
                    "'=' is not allowed in arguments to {}, whose arguments are interpreted",
                    self.base
                ),
            });
        }

        Ok(())
    }

    /// Vet a caller-supplied `args` array element. Elements bypass template
    /// substitution, so only the common overlays apply.
    pub fn validate_args_element(&self, value: &str) -> Result<()> {
        validate_common("args", value, self.in_container)
    }

    fn check_level_rules(&self, parameter: &str, value: &str, level: QuoteLevel) -> Result<()> {
        match level {
            QuoteLevel::Backtick => {
                if self.interpreter.is_none() {
                    if let Some(ch) = value.chars().find(|c| DANGEROUS_CHARS.contains(c) || *c == '`') {
                        return Err(shell_injection(parameter, level, ch));
                    }
                }
            }
            QuoteLevel::SingleQuoted => {
                if let Some(ch) = value.chars().find(|c| *c == '\'' || *c == '`') {
                    return Err(shell_injection(parameter, level, ch));
                }
                let stripped: String = value
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_ascii_lowercase();
                for banned in SINGLE_QUOTE_BANNED_CALLS {
                    if stripped.contains(banned) {
                        return Err(Error::ShellInjection {
                            parameter: parameter.to_string(),
                            reason: format!("process-spawning call {banned:?} in quoted value"),
                        });
                    }
                }
            }
            QuoteLevel::DoubleQuoted => {
                if let Some(ch) = value.chars().find(|c| matches!(c, '"' | '$' | '`' | '\\' | '%')) {
                    return Err(shell_injection(parameter, level, ch));
                }
            }
            QuoteLevel::Unquoted => {
                if let Some(ch) = value.chars().find(|c| DANGEROUS_CHARS.contains(c)) {
                    return Err(shell_injection(parameter, level, ch));
                }
                if self.base == "env" && value.contains('=') {
                    return Err(Error::ShellInjection {
                        parameter: parameter.to_string(),
                        reason: "'=' would inject a variable into env".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_interpreter_overlays(
        &self,
        parameter: &str,
        value: &str,
        level: QuoteLevel,
        occurrences: &[(usize, &String)],
    ) -> Result<()> {
        let placeholder = format!("{{{{{parameter}}}}}");
        match self.interpreter {
            Some(Interpreter::Python) => {
                let inside_fstring = occurrences
                    .iter()
                    .any(|(_, element)| placeholder_in_fstring(element, &placeholder));
                if inside_fstring && value.chars().any(|c| c == '{' || c == '}') {
                    return Err(Error::ShellInjection {
                        parameter: parameter.to_string(),
                        reason: "braces inside a python f-string expand expressions".into(),
                    });
                }
            }
            Some(Interpreter::Ruby) => {
                if matches!(level, QuoteLevel::DoubleQuoted | QuoteLevel::Backtick)
                    && value.contains("#{")
                {
                    return Err(Error::ShellInjection {
                        parameter: parameter.to_string(),
                        reason: "ruby string interpolation #{..} in quoted value".into(),
                    });
                }
            }
            Some(Interpreter::Node) => {
                if level == QuoteLevel::Backtick && value.contains("${") {
                    return Err(Error::ShellInjection {
                        parameter: parameter.to_string(),
                        reason: "template-literal interpolation ${..} in backtick value".into(),
                    });
                }
            }
            Some(Interpreter::Perl) | Some(Interpreter::Php) => {
                if matches!(level, QuoteLevel::DoubleQuoted | QuoteLevel::Backtick)
                    && value.contains("${")
                {
                    return Err(Error::ShellInjection {
                        parameter: parameter.to_string(),
                        reason: "variable interpolation ${..} in quoted value".into(),
                    });
                }
            }
            Some(Interpreter::Awk) => {
                if value.contains('|') {
                    return Err(Error::ShellInjection {
                        parameter: parameter.to_string(),
                        reason: "awk pipe opens a subprocess".into(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Overlays applied to every substituted value regardless of context.
fn validate_common(parameter: &str, value: &str, in_container: bool) -> Result<()> {
    if value.contains("{{") {
        return Err(Error::RecursiveInjection {
            parameter: parameter.to_string(),
        });
    }
    super::traversal::check_traversal(parameter, value)?;
    super::traversal::check_scheme(parameter, value, in_container)?;
    super::traversal::check_absolute_path(parameter, value, in_container)?;
    super::traversal::check_flag_smuggling(parameter, value)?;
    Ok(())
}

fn shell_injection(parameter: &str, level: QuoteLevel, ch: char) -> Error {
    Error::ShellInjection {
        parameter: parameter.to_string(),
        reason: format!("character {ch:?} is not allowed in {level:?} context"),
    }
}

/// Whether the placeholder sits inside a python string literal carrying an
/// `f`, `rf` or `fr` prefix.
fn placeholder_in_fstring(element: &str, placeholder: &str) -> bool {
    let bytes = element.as_bytes();
    let mut search_from = 0;
    while let Some(relative) = element[search_from..].find(placeholder) {
        let at = search_from + relative;
        if enclosing_literal_is_fstring(bytes, at) {
            return true;
        }
        search_from = at + placeholder.len();
    }
    false
}

fn enclosing_literal_is_fstring(bytes: &[u8], position: usize) -> bool {
    let mut open_quote: Option<(usize, u8)> = None;
    let mut i = 0;
    while i < position {
        let ch = bytes[i];
        match open_quote {
            Some((_, quote)) => {
                if ch == b'\\' {
                    i += 2;
                    continue;
                }
                if ch == quote {
                    open_quote = None;
                }
            }
            None => {
                if ch == b'\'' || ch == b'"' {
                    open_quote = Some((i, ch));
                }
            }
        }
        i += 1;
    }

    let Some((start, _)) = open_quote else {
        return false;
    };

    // Examine up to two prefix characters before the opening quote.
    let mut prefix = Vec::new();
    let mut j = start;
    while j > 0 && prefix.len() < 2 {
        let ch = bytes[j - 1].to_ascii_lowercase();
        if ch == b'f' || ch == b'r' || ch == b'b' || ch == b'u' {
            prefix.push(ch);
            j -= 1;
        } else {
            break;
        }
    }
    prefix.contains(&b'f')
}
