//! Name pattern matching: `*` globs and `group:<name>` expansion.

/// Normalizes a tool name for comparison: trimmed and lowercased.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Matches a normalized name against a pattern.
///
/// Exact comparison first, then glob matching where `*` spans any run of
/// characters; globs are anchored over the full name.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    let name = normalize(name);
    let pattern = normalize(pattern);
    if name == pattern {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }
    match glob_to_regex(&pattern) {
        Some(re) => re.is_match(&name),
        None => false,
    }
}

/// Converts a glob into an anchored regex (`*` becomes `.*`, everything
/// else is escaped literally).
pub fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            out.push_str(".*");
        } else {
            out.push_str(&regex::escape(&ch.to_string()));
        }
    }
    out.push('$');
    regex::Regex::new(&out).ok()
}

/// Built-in tool groups addressable as `group:<name>` in policy lists.
fn group_members(name: &str) -> &'static [&'static str] {
    match name {
        "fs" => &["read_file", "write_file", "list_files"],
        "runtime" => &["shell", "script"],
        "memory" => &["memory_read", "memory_write", "memory_search"],
        "mcp" => &["mcp_*"],
        "web" => &["web_search", "web_fetch", "http_request"],
        _ => &[],
    }
}

/// Expands `group:<name>` references into their members, de-duplicating
/// while preserving first occurrence. Unknown groups contribute nothing.
pub fn expand_groups(patterns: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(patterns.len());
    let mut push_unique = |value: String, out: &mut Vec<String>| {
        if !out.contains(&value) {
            out.push(value);
        }
    };
    for pattern in patterns {
        if let Some(group) = pattern.strip_prefix("group:") {
            for member in group_members(&normalize(group)) {
                push_unique(member.to_string(), &mut out);
            }
        } else {
            push_unique(pattern.clone(), &mut out);
        }
    }
    out
}
