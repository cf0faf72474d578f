//! Command safety checker for the shell tool.
//!
//! Blocks dangerous commands BEFORE execution. The goal is not an airtight
//! sandbox — that requires OS-level namespacing — but to catch the footgun
//! patterns an LLM is likely to emit: destructive filesystem commands,
//! privilege escalation, package installation, and redirection that escapes
//! the conversation workspace.

use std::sync::OnceLock;

use regex::Regex;

fn deny_set() -> &'static Vec<(Regex, &'static str, &'static str)> {
    static SET: OnceLock<Vec<(Regex, &'static str, &'static str)>> = OnceLock::new();
    SET.get_or_init(|| {
        DENY_PATTERNS
            .iter()
            .map(|(pattern, reason)| {
                (
                    Regex::new(pattern).expect("deny pattern must compile"),
                    *pattern,
                    *reason,
                )
            })
            .collect()
    })
}

fn mv_parent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bmv\b[^\n]*\.\./").expect("regex must compile"))
}

fn redirect_absolute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\d?>>?)\s*/").expect("regex must compile"))
}

/// Check whether `command` is safe to execute inside a workspace.
///
/// Returns `Ok(())` if safe, or `Err(reason)` explaining the block.
pub fn check_command(command: &str) -> Result<(), String> {
    let trimmed = command.trim();
    let lower = trimmed.to_lowercase();

    for (re, pattern, reason) in deny_set() {
        if re.is_match(&lower) {
            return Err(format!("{reason} (matched pattern: `{pattern}`)"));
        }
    }

    // Redirection must stay inside the workspace: `>`, `>>` and `2>` into a
    // parent directory or an absolute path escape the conversation scope.
    if has_redirect(&lower) && (lower.contains("../") || redirect_absolute_re().is_match(&lower)) {
        return Err("redirect escapes the conversation workspace".to_string());
    }

    // `mv` into a parent directory leaves the workspace too.
    if mv_parent_re().is_match(&lower) {
        return Err("mv into a parent directory escapes the workspace".to_string());
    }

    Ok(())
}

fn has_redirect(lower: &str) -> bool {
    lower.contains('>')
}

/// `(regex_pattern, reason)` pairs, matched against the lowercased command.
/// First match wins.
const DENY_PATTERNS: &[(&str, &str)] = &[
    (r"\bsudo\b", "sudo requires elevated permissions"),
    (r"\brm\b", "rm is blocked; delete files through the file tools"),
    (r"\bchmod\b", "chmod is blocked"),
    (r"\bchown\b", "chown is blocked"),
    (r"\bmkfs\b", "mkfs creates a new filesystem, wiping data"),
    (r"\bmount\b|\bumount\b", "mount operations are blocked"),
    (r"\bshutdown\b|\breboot\b|\bhalt\b|\bpoweroff\b", "system state commands are blocked"),
    (r"\bscp\b|\bssh\b", "remote shells and copies are blocked"),
    (r"\bpip3?\s+install\b", "package installation is blocked"),
    (r"\bconda\s+install\b", "package installation is blocked"),
    (r"\bnpm\s+install\b", "package installation is blocked"),
    (r"\byarn\s+(add|install)\b", "package installation is blocked"),
    (r"\bapt(-get)?\s+install\b", "package installation is blocked"),
    (r"\byum\s+install\b", "package installation is blocked"),
    (r"\bbrew\s+install\b", "package installation is blocked"),
    (r"\bplaywright\s+install\b", "package installation is blocked"),
];
