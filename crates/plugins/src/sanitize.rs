//! Plugin name sanitization (§6): a manifest `name` can be arbitrary UTF-8,
//! but the in-process registry key and the synthetic crate/module name
//! derived from it must be a valid, collision-free Rust identifier.

use std::collections::HashSet;

/// Turn `name` into a lowercase `[a-z0-9_]` identifier, collapsing runs of
/// invalid characters to a single underscore and prefixing with `p_` if the
/// result would not start with a letter or underscore.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }

    if out.is_empty() {
        out = "plugin".to_string();
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert_str(0, "p_");
    }
    out
}

/// Sanitize `name`, then disambiguate against `taken` by appending `_2`,
/// `_3`, … until the result is unique. Inserts the chosen name into `taken`.
pub fn unique_sanitized_name(name: &str, taken: &mut HashSet<String>) -> String {
    let base = sanitize_name(name);
    if taken.insert(base.clone()) {
        return base;
    }

    let mut suffix = 2;
    loop {
        let candidate = format!("{base}_{suffix}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_passes_through_lowercased() {
        assert_eq!(sanitize_name("Weather"), "weather");
    }

    #[test]
    fn spaces_and_punctuation_collapse_to_underscore() {
        assert_eq!(sanitize_name("My Cool-Plugin!!"), "my_cool_plugin");
    }

    #[test]
    fn leading_digit_gets_prefixed() {
        assert_eq!(sanitize_name("123abc"), "p_123abc");
    }

    #[test]
    fn empty_input_falls_back_to_placeholder() {
        assert_eq!(sanitize_name("   "), "plugin");
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let mut taken = HashSet::new();
        assert_eq!(unique_sanitized_name("Weather", &mut taken), "weather");
        assert_eq!(unique_sanitized_name("weather", &mut taken), "weather_2");
        assert_eq!(unique_sanitized_name("Weather!!", &mut taken), "weather_3");
    }
}
