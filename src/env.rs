//! Environment variable lookup.
//!
//! The manager never reads the process environment directly; it goes through
//! an [`EnvLookup`] so that tests can substitute an in-memory map.

use std::collections::HashMap;
use std::env;

/// Looks an environment variable up by name.
pub type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads the process environment.
///
/// Variables that are unset or not valid unicode are reported as missing.
pub fn process_env() -> EnvLookup {
    Box::new(|name| env::var(name).ok())
}

/// Serves lookups from a fixed set of pairs.
///
/// # Example
/// ```
/// use spicetree::env::from_pairs;
///
/// let lookup = from_pairs([("APP_NARU_A", "10")]);
/// assert_eq!(lookup("APP_NARU_A"), Some("10".to_string()));
/// assert_eq!(lookup("APP_NARU_B"), None);
/// ```
pub fn from_pairs<I, K, V>(pairs: I) -> EnvLookup
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let vars: HashMap<String, String> = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Box::new(move |name| vars.get(name).cloned())
}
