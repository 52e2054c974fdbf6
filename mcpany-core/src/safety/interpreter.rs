//! Interpreter detection and dangerous argv-position identification.
//!
//! The base command name decides two things: whether interpreter-specific
//! injection overlays apply (a closed vocabulary), and whether the command
//! belongs to the broader class whose arguments are themselves interpreted
//! (shells, multiplexers, network tools, build drivers, cloud CLIs), which
//! triggers strict substitution checks regardless of quoting.

use std::collections::HashSet;

/// Closed vocabulary of interpreters with dedicated overlay rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    Python,
    Ruby,
    Perl,
    Node,
    Php,
    Lua,
    Awk,
    Sed,
    PosixShell,
    WindowsShell,
}

/// Normalize an invoking command to its base name: strip any path, lowercase,
/// drop a `.exe` suffix and any trailing version suffix of `[0-9.\-]+`
/// (`python3.11` → `python`, `node18` → `node`, `php-8.2` → `php`).
pub fn normalize_base(command: &str) -> String {
    let base = command
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(command)
        .to_ascii_lowercase();
    let base = base.strip_suffix(".exe").unwrap_or(&base);
    let trimmed = base.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-');
    if trimmed.is_empty() {
        base.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Detect an interpreter from a normalized base name.
pub fn detect_interpreter(base: &str) -> Option<Interpreter> {
    match base {
        "python" | "pypy" => Some(Interpreter::Python),
        "ruby" | "jruby" => Some(Interpreter::Ruby),
        "perl" => Some(Interpreter::Perl),
        "node" | "nodejs" | "bun" | "deno" => Some(Interpreter::Node),
        "php" => Some(Interpreter::Php),
        "lua" | "luajit" => Some(Interpreter::Lua),
        "awk" | "gawk" | "mawk" | "nawk" => Some(Interpreter::Awk),
        "sed" | "gsed" => Some(Interpreter::Sed),
        "sh" | "bash" | "zsh" | "ksh" | "dash" | "fish" | "csh" | "tcsh" | "ash" => {
            Some(Interpreter::PosixShell)
        }
        "cmd" | "powershell" | "pwsh" => Some(Interpreter::WindowsShell),
        _ => None,
    }
}

/// Commands whose arguments end up interpreted somewhere downstream: every
/// interpreter above, plus wrappers that re-exec (`env`, `xargs`, `nohup`),
/// programs with config-driven command execution (`git`, `find`, editors,
/// build drivers), network tools and cloud CLIs. Substitutions into their
/// argv get the strict check set.
const INTERPRETED_ARGUMENT_COMMANDS: &[&str] = &[
    "env", "xargs", "find", "nohup", "timeout", "stdbuf", "nice", "ionice", "setsid", "watch",
    "sudo", "doas", "su", "git", "hg", "svn", "ssh", "scp", "rsync", "curl", "wget", "nc", "ncat",
    "netcat", "socat", "telnet", "ftp", "vim", "vi", "nvim", "emacs", "nano", "less", "more",
    "man", "make", "cmake", "ninja", "cargo", "npm", "npx", "yarn", "pnpm", "pip", "gem", "mvn",
    "gradle", "docker", "podman", "nerdctl", "kubectl", "helm", "aws", "gcloud", "az",
    "terraform", "ansible", "tmux", "screen", "strace", "ltrace", "gdb", "lldb", "busybox",
    "script", "expect", "at", "batch", "crontab", "systemctl", "service", "openssl",
];

/// Whether substitutions into this command's argv require strict checks.
pub fn requires_strict_checks(base: &str) -> bool {
    detect_interpreter(base).is_some() || INTERPRETED_ARGUMENT_COMMANDS.contains(&base)
}

/// Flags whose operand is code for the common interpreters.
const CODE_OPERAND_FLAGS: &[&str] = &["-c", "-e", "-r", "-p", "--eval", "-E", "--exec"];

/// Identify argv template positions that carry code: the operand of `-c`,
/// `-e`, `-r`, `--eval` and friends, and the first non-flag script argument
/// for the awk and sed families. Index 0 (the command itself) is never
/// returned.
pub fn identify_dangerous_positions(argv: &[String], interpreter: Option<Interpreter>) -> HashSet<usize> {
    let mut positions = HashSet::new();
    if argv.is_empty() || interpreter.is_none() {
        return positions;
    }

    let mut expect_operand = false;
    for (index, element) in argv.iter().enumerate().skip(1) {
        if expect_operand {
            positions.insert(index);
            expect_operand = false;
            continue;
        }
        if CODE_OPERAND_FLAGS.contains(&element.as_str()) {
            expect_operand = true;
            continue;
        }
        // Combined short flag with inline operand, e.g. `-eprint`.
        if element.len() > 2
            && (element.starts_with("-c") || element.starts_with("-e") || element.starts_with("-r"))
            && !element.starts_with("--")
        {
            positions.insert(index);
        }
    }

    // awk and sed take their program as the first non-flag argument.
    if matches!(interpreter, Some(Interpreter::Awk) | Some(Interpreter::Sed)) {
        if let Some((index, _)) = argv
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, element)| !element.starts_with('-'))
        {
            positions.insert(index);
        }
    }

    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_normalization() {
        assert_eq!(normalize_base("/usr/bin/python3.11"), "python");
        assert_eq!(normalize_base("node18"), "node");
        assert_eq!(normalize_base("php-8.2"), "php");
        assert_eq!(normalize_base("CMD.EXE"), "cmd");
        assert_eq!(normalize_base("gsed"), "gsed");
        assert_eq!(normalize_base("git"), "git");
    }

    #[test]
    fn interpreter_vocabulary_is_closed() {
        assert_eq!(detect_interpreter("python"), Some(Interpreter::Python));
        assert_eq!(detect_interpreter("deno"), Some(Interpreter::Node));
        assert_eq!(detect_interpreter("gawk"), Some(Interpreter::Awk));
        assert_eq!(detect_interpreter("pwsh"), Some(Interpreter::WindowsShell));
        assert_eq!(detect_interpreter("cat"), None);
        assert_eq!(detect_interpreter("git"), None);
    }

    #[test]
    fn strict_list_covers_interpreter_ish_commands() {
        assert!(requires_strict_checks("bash"));
        assert!(requires_strict_checks("git"));
        assert!(requires_strict_checks("env"));
        assert!(requires_strict_checks("kubectl"));
        assert!(!requires_strict_checks("cat"));
        assert!(!requires_strict_checks("ls"));
    }

    #[test]
    fn code_flag_operands_are_flagged() {
        let argv: Vec<String> = ["python3", "-c", "print({{x}})"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let positions = identify_dangerous_positions(&argv, Some(Interpreter::Python));
        assert!(positions.contains(&2));
        assert!(!positions.contains(&1));
    }

    #[test]
    fn awk_first_non_flag_is_the_program() {
        let argv: Vec<String> = ["awk", "-F", ",", "{print $1}", "{{file}}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let positions = identify_dangerous_positions(&argv, Some(Interpreter::Awk));
        // `-F` is a flag, `,` follows a flag-looking element; the first bare
        // non-flag element is the program.
        assert!(positions.contains(&2) || positions.contains(&3));
    }

    #[test]
    fn non_interpreters_have_no_code_positions() {
        let argv: Vec<String> = ["tar", "-c", "{{dir}}"].iter().map(|s| s.to_string()).collect();
        assert!(identify_dangerous_positions(&argv, None).is_empty());
    }
}
