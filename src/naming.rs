//! Name normalization for item paths, flag names and environment variables.

use regex_lite::Regex;
use std::sync::OnceLock;

/// Environment names start with a letter or underscore, followed by letters,
/// digits and underscores only.
fn env_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("(?i)^[a-z_][a-z0-9_]*$").expect("valid env name pattern"))
}

/// Normalizes an identifier into a lowercase, `_`-delimited token.
///
/// When `sep` is non-empty and present in `identifier`, every `sep`-separated
/// segment is normalized on its own and the segments are joined back with
/// `sep`. Otherwise a `_` is inserted before each uppercase character that
/// directly follows a lowercase one, and the result is lowercased. Runs of
/// capitals stay together, so abbreviations collapse into one token.
///
/// # Example
/// ```
/// use spicetree::naming::normalize;
///
/// assert_eq!(normalize("FindMe", ""), "find_me");
/// assert_eq!(normalize("JSONRpc", ""), "jsonrpc");
/// assert_eq!(normalize("ABCDe.JSONRpc", "."), "abcde.jsonrpc");
/// ```
pub fn normalize(identifier: &str, sep: &str) -> String {
    normalize_with(identifier, sep, '_')
}

/// Same segmentation as [`normalize`], joining case breaks with `joiner`.
///
/// Flag names use `-` as the joiner: `normalize_with("PoolSize", "", '-')`
/// gives `pool-size`.
pub fn normalize_with(identifier: &str, sep: &str, joiner: char) -> String {
    if identifier.is_empty() {
        return String::new();
    }

    if !sep.is_empty() && identifier.contains(sep) {
        return identifier
            .split(sep)
            .map(|segment| normalize_with(segment, "", joiner))
            .collect::<Vec<_>>()
            .join(sep);
    }

    let mut out = String::with_capacity(identifier.len() + 4);
    let mut previous: Option<char> = None;
    for c in identifier.chars() {
        if c.is_uppercase() && previous.is_some_and(|p| p.is_lowercase()) {
            out.push(joiner);
        }
        out.push(c);
        previous = Some(c);
    }

    out.to_lowercase()
}

/// Checks a candidate environment variable name.
pub fn is_valid_env_name(name: &str) -> bool {
    env_name_pattern().is_match(name)
}

/// Turns a program or group prefix into its environment form: uppercase,
/// with `-` and `.` replaced by `_`.
pub fn env_prefix(prefix: &str) -> String {
    prefix.to_uppercase().replace(['-', '.'], "_")
}
