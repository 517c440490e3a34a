//! The neutral locator grammar (§6.1) — parsing, not matching. Matching
//! against a live DOM is the driver's job (`driver` module); this module
//! only turns a locator string into a typed [`Locator`] so the rest of the
//! core never string-matches on `target` directly.
//!
//! Grammar:
//! - `text=<literal>` — visible text equals, case-insensitive trim.
//! - `text=/<regex>/<flags>` — regex over visible text.
//! - `role=<role>[name=<literal>]` — ARIA role, optional accessible name.
//! - `[<attr>=<literal>]` — attribute equals.
//! - `css:<selector>` — CSS selector.
//! - `xpath:<expr>` — XPath expression.
//! - `<selector>::<attr>` — only inside `attributeEquals`; splits off the
//!   attribute name before the rest is parsed as one of the above.

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    Text(String),
    TextRegex { pattern: String, flags: String },
    Role { role: String, name: Option<String> },
    Attribute { name: String, value: String },
    Css(String),
    XPath(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid locator '{0}'")]
pub struct LocatorParseError(pub String);

/// Splits the `selector::attr` form used by `attributeEquals` assertions.
/// Returns `(selector, None)` when there is no `::` suffix.
pub fn split_attribute_suffix(target: &str) -> (&str, Option<&str>) {
    match target.rsplit_once("::") {
        Some((selector, attr)) if !attr.is_empty() => (selector, Some(attr)),
        _ => (target, None),
    }
}

pub fn parse(target: &str) -> Result<Locator, LocatorParseError> {
    let (selector, _attr) = split_attribute_suffix(target);

    if let Some(rest) = selector.strip_prefix("text=") {
        if let Some(body) = rest.strip_prefix('/') {
            let last_slash = body.rfind('/').ok_or_else(|| LocatorParseError(target.to_string()))?;
            let (pattern, flags) = body.split_at(last_slash);
            return Ok(Locator::TextRegex {
                pattern: pattern.to_string(),
                flags: flags[1..].to_string(),
            });
        }
        return Ok(Locator::Text(rest.to_string()));
    }

    if let Some(rest) = selector.strip_prefix("role=") {
        if let Some(name_start) = rest.find("[name=") {
            let role = &rest[..name_start];
            let after = &rest[name_start + "[name=".len()..];
            let name = after.strip_suffix(']').unwrap_or(after);
            return Ok(Locator::Role { role: role.to_string(), name: Some(name.to_string()) });
        }
        return Ok(Locator::Role { role: rest.to_string(), name: None });
    }

    if let Some(rest) = selector.strip_prefix("css:") {
        return Ok(Locator::Css(rest.to_string()));
    }

    if let Some(rest) = selector.strip_prefix("xpath:") {
        return Ok(Locator::XPath(rest.to_string()));
    }

    if selector.starts_with('[') && selector.ends_with(']') {
        let inner = &selector[1..selector.len() - 1];
        let (name, value) = inner
            .split_once('=')
            .ok_or_else(|| LocatorParseError(target.to_string()))?;
        let value = value.trim_matches(|c| c == '\'' || c == '"');
        return Ok(Locator::Attribute { name: name.to_string(), value: value.to_string() });
    }

    Err(LocatorParseError(target.to_string()))
}

/// Compiles a `text=/.../flags` regex locator, honoring the `i` flag.
pub fn compile_text_regex(pattern: &str, flags: &str) -> Result<Regex, regex::Error> {
    let mut builder = regex::RegexBuilder::new(pattern);
    if flags.contains('i') {
        builder.case_insensitive(true);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_literal() {
        assert_eq!(parse("text=Learn more").unwrap(), Locator::Text("Learn more".into()));
    }

    #[test]
    fn parses_text_regex_with_flags() {
        let loc = parse("text=/^Sign (in|up)$/i").unwrap();
        assert_eq!(loc, Locator::TextRegex { pattern: "^Sign (in|up)$".into(), flags: "i".into() });
    }

    #[test]
    fn parses_role_with_name() {
        let loc = parse("role=button[name=Submit]").unwrap();
        assert_eq!(loc, Locator::Role { role: "button".into(), name: Some("Submit".into()) });
    }

    #[test]
    fn parses_role_without_name() {
        assert_eq!(parse("role=heading").unwrap(), Locator::Role { role: "heading".into(), name: None });
    }

    #[test]
    fn parses_attribute() {
        assert_eq!(
            parse("[data-testid=submit-btn]").unwrap(),
            Locator::Attribute { name: "data-testid".into(), value: "submit-btn".into() }
        );
    }

    #[test]
    fn parses_css_and_xpath() {
        assert_eq!(parse("css:.button.primary").unwrap(), Locator::Css(".button.primary".into()));
        assert_eq!(parse("xpath://div[@id='x']").unwrap(), Locator::XPath("//div[@id='x']".into()));
    }

    #[test]
    fn splits_attribute_suffix_for_attribute_equals() {
        let (selector, attr) = split_attribute_suffix("css:#link::href");
        assert_eq!(selector, "css:#link");
        assert_eq!(attr, Some("href"));
    }

    #[test]
    fn rejects_unknown_grammar() {
        assert!(parse("bogus(nonsense)").is_err());
    }
}
