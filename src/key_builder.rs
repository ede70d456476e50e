//! Deterministic cache key construction.

use std::fmt::Display;

/// Build a cache key as `prefix:k1=v1&k2=v2` with parameters sorted by name.
///
/// Parameter order never affects the result. An empty parameter set yields
/// `prefix:default`.
pub fn build_key<I, K, V>(prefix: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Display,
    V: Display,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if pairs.is_empty() {
        return format!("{}:default", prefix);
    }

    pairs.sort();

    let rendered = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}:{}", prefix, rendered)
}
