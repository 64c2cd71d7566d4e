//! Built-in redaction patterns.
//!
//! Order matters: URL credentials run before e-mail addresses
//! (`user:pass@host.com` would otherwise be half-eaten as an address), and
//! card numbers run before phone numbers.

/// A built-in pattern and its replacement template.
///
/// Replacements may keep a non-secret prefix through a named group so the
/// redacted text stays readable (`Bearer [REDACTED]`).
pub(crate) struct BuiltinPattern {
    pub name: &'static str,
    pub regex: &'static str,
    pub replacement: &'static str,
}

pub(crate) const BUILTIN_PATTERNS: &[BuiltinPattern] = &[
    BuiltinPattern {
        name: "url_credentials",
        regex: r"(?P<scheme>\b[a-zA-Z][a-zA-Z0-9+.\-]*://)[^\s:/@]+:[^\s/@]+@",
        replacement: "${scheme}[REDACTED]@",
    },
    BuiltinPattern {
        name: "bearer_token",
        regex: r"(?i)(?P<prefix>\bbearer\s+)[A-Za-z0-9\-._~+/]+=*",
        replacement: "${prefix}[REDACTED]",
    },
    BuiltinPattern {
        name: "jwt",
        regex: r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "aws_access_key",
        regex: r"\b(?:AKIA|ASIA|AGPA|AIDA|AROA)[0-9A-Z]{16}\b",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "github_token",
        regex: r"\b(?:gh[pousr]_[A-Za-z0-9]{36,255}|github_pat_[A-Za-z0-9_]{22,255})\b",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "gitlab_token",
        regex: r"\bglpat-[A-Za-z0-9_\-]{20,}",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "api_key_assignment",
        regex: r#"(?i)\b(?P<key>api[_-]?key|access[_-]?token|auth[_-]?token|client[_-]?secret|secret|password|passwd|pwd)(?P<sep>["']?\s*[:=]\s*["']?)[^\s"',;]{6,}"#,
        replacement: "${key}${sep}[REDACTED]",
    },
    BuiltinPattern {
        name: "prefixed_api_key",
        regex: r"\b(?:sk|pk|rk)_(?:live|test)_[A-Za-z0-9]{16,}\b",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "email",
        regex: r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "credit_card",
        regex: r"\b(?:\d{4}[ \-]?){3}\d{1,4}\b",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "national_id",
        regex: r"\b\d{3}-\d{2}-\d{4}\b",
        replacement: "[REDACTED]",
    },
    BuiltinPattern {
        name: "phone_number",
        regex: r"(?:\+\d{1,3}[\s.\-]?)?(?:\(\d{3}\)|\b\d{3})[\s.\-]\d{3}[\s.\-]\d{4}\b",
        replacement: "[REDACTED]",
    },
];
