use crate::error::{Result, TagmarkError};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Shortest allowed tag name
pub const TAG_MIN: usize = 1;
/// Longest allowed tag name
pub const TAG_MAX: usize = 35;

fn tag_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w[\w!?.,$-_ ]*$").expect("tag name pattern is valid"))
}

/// Parse comma-separated tags, filtering empty ones
pub fn parse_tags(tags_str: &str) -> Vec<String> {
    tags_str
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Lowercase and deduplicate tag names; the result is sorted by name
pub fn normalize_tags<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.as_ref().trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Check a single tag name against the length bounds and the name pattern
pub fn validate_tag_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if !(TAG_MIN..=TAG_MAX).contains(&len) || !tag_name_re().is_match(name) {
        return Err(TagmarkError::InvalidTag(name.to_string()));
    }
    Ok(())
}

/// Normalize then validate every name
pub fn clean_tags<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    let tags = normalize_tags(names);
    for tag in &tags {
        validate_tag_name(tag)?;
    }
    Ok(tags)
}

/// Split a tag search expression into included and excluded names.
/// A leading `-` marks a tag for exclusion.
pub fn split_exclusions<S: AsRef<str>>(terms: &[S]) -> (Vec<String>, Vec<String>) {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for term in terms {
        let term = term.as_ref().trim();
        match term.strip_prefix('-') {
            Some(rest) if !rest.is_empty() => exclude.push(rest.to_string()),
            Some(_) => {}
            None if !term.is_empty() => include.push(term.to_string()),
            None => {}
        }
    }
    (include, exclude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", vec![])]
    #[case(",", vec![])]
    #[case(",,,", vec![])]
    #[case("rust", vec!["rust"])]
    #[case("rust,testing", vec!["rust", "testing"])]
    #[case(",rust,testing,", vec!["rust", "testing"])]
    #[case("  rust  ,  testing  ", vec!["rust", "testing"])]
    #[case("rust,,testing", vec!["rust", "testing"])]
    fn test_parse_tags(#[case] input: &str, #[case] expected: Vec<&str>) {
        assert_eq!(parse_tags(input), expected);
    }

    #[test]
    fn test_normalize_lowercases_and_dedupes() {
        let result = normalize_tags(&["Web", "python", "WEB", " web "]);
        assert_eq!(result, vec!["python", "web"]);
    }

    #[test]
    fn test_normalize_handles_unicode() {
        let result = normalize_tags(&["Perù", "ПРОГРАММИРОВАНИЕ"]);
        assert_eq!(result, vec!["perù", "программирование"]);
    }

    #[rstest]
    #[case("rust")]
    #[case("c++")]
    #[case("web dev")]
    #[case("what?")]
    #[case("perù")]
    #[case("a")]
    fn test_valid_tag_names(#[case] name: &str) {
        assert!(validate_tag_name(name).is_ok(), "{name} should be valid");
    }

    #[rstest]
    #[case("")]
    #[case(" leading-space")]
    #[case("-dash")]
    #[case("curly{brace")]
    #[case("this tag name is definitely longer than allowed")]
    fn test_invalid_tag_names(#[case] name: &str) {
        assert!(matches!(
            validate_tag_name(name),
            Err(TagmarkError::InvalidTag(_))
        ));
    }

    #[test]
    fn test_split_exclusions() {
        let (include, exclude) = split_exclusions(&["web", "-bing", "python", "-", ""]);
        assert_eq!(include, vec!["web", "python"]);
        assert_eq!(exclude, vec!["bing"]);
    }
}
