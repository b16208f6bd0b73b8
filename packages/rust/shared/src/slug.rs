//! Slug helpers: path slugs, glob patterns, and compiled slug templates.

use regex::Regex;

use crate::config::SlugTemplateConfig;
use crate::error::{HssError, Result};
use crate::types::ResourceType;

/// Generate a URL-safe slug segment from free text.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Convert a glob-like pattern to an anchored regex.
///
/// `**/` matches zero or more directories, `**` anything, `*` within one
/// segment, `?` one character.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*/", "(?:.*/)?")
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}

// ---------------------------------------------------------------------------
// Slug templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    /// One path segment.
    Segment(String),
    /// Remainder of the path, may contain `/`.
    Rest(String),
}

/// A `[slugs.<name>]` entry compiled into a URL matcher and a reverse generator.
#[derive(Debug, Clone)]
pub struct SlugTemplate {
    pub name: String,
    pub resource_type: ResourceType,
    domain: String,
    prefix: String,
    slug_prefix: String,
    parts: Vec<Part>,
    matcher: Regex,
}

impl SlugTemplate {
    pub fn compile(name: &str, config: &SlugTemplateConfig) -> Result<Self> {
        let parts = parse_pattern(&config.pattern)
            .ok_or_else(|| HssError::config(format!("slug template `{name}` has an unclosed placeholder")))?;

        let mut regex = String::from("^");
        regex.push_str(&regex::escape(&config.prefix));
        for part in &parts {
            match part {
                Part::Literal(text) => regex.push_str(&regex::escape(text)),
                Part::Segment(_) => regex.push_str("([^/]+)"),
                Part::Rest(_) => regex.push_str("(.+)"),
            }
        }
        regex.push('$');
        let matcher = Regex::new(&regex)
            .map_err(|e| HssError::config(format!("slug template `{name}`: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            resource_type: config.resource_type,
            domain: config.domain.clone(),
            prefix: config.prefix.clone(),
            slug_prefix: config.slug_prefix.clone(),
            parts,
            matcher,
        })
    }

    /// Slug for `url` if it belongs to this template's domain and matches.
    pub fn match_url(&self, url: &url::Url) -> Option<String> {
        if url.host_str()? != self.domain {
            return None;
        }
        let captures = self.matcher.captures(url.path())?;
        let values: Vec<&str> = captures
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().trim_matches('/'))
            .collect();
        Some(format!("{}{}", self.slug_prefix, values.join("/")))
    }

    /// URL that would produce `slug`, if the slug has this template's shape.
    pub fn generate_url(&self, slug: &str) -> Option<String> {
        let mut rest = slug.strip_prefix(self.slug_prefix.as_str())?;
        let mut path = self.prefix.clone();
        for part in &self.parts {
            match part {
                Part::Literal(text) => path.push_str(text),
                Part::Segment(_) => {
                    let (value, tail) = rest.split_once('/').unwrap_or((rest, ""));
                    if value.is_empty() {
                        return None;
                    }
                    path.push_str(value);
                    rest = tail;
                }
                Part::Rest(_) => {
                    if rest.is_empty() {
                        return None;
                    }
                    path.push_str(rest);
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            return None;
        }
        Some(format!("https://{}{}", self.domain, path))
    }
}

fn parse_pattern(pattern: &str) -> Option<Vec<Part>> {
    let mut parts = Vec::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(Part::Literal(rest[..open].to_string()));
        }
        let close = rest[open..].find('}')? + open;
        let name = &rest[open + 1..close];
        match name.strip_suffix('*') {
            Some(name) => parts.push(Part::Rest(name.to_string())),
            None => parts.push(Part::Segment(name.to_string())),
        }
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(pattern: &str) -> SlugTemplate {
        SlugTemplate::compile(
            "example",
            &SlugTemplateConfig {
                resource_type: ResourceType::Manifest,
                domain: "example.org".into(),
                prefix: "/iiif/".into(),
                pattern: pattern.into(),
                slug_prefix: "manifests/".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("  Date / Era "), "date-era");
    }

    #[test]
    fn glob_matches_nested_json() {
        let re = glob_to_regex("**/*.json").unwrap();
        assert!(re.is_match("demo.json"));
        assert!(re.is_match("a/b/demo.json"));
        assert!(!re.is_match("demo.txt"));

        let re = glob_to_regex("objects/*.json").unwrap();
        assert!(re.is_match("objects/one.json"));
        assert!(!re.is_match("objects/nested/one.json"));
    }

    #[test]
    fn template_matches_and_generates() {
        let t = template("{id}/manifest.json");
        let url = url::Url::parse("https://example.org/iiif/abc/manifest.json").unwrap();
        assert_eq!(t.match_url(&url).as_deref(), Some("manifests/abc"));
        assert_eq!(
            t.generate_url("manifests/abc").as_deref(),
            Some("https://example.org/iiif/abc/manifest.json")
        );

        let other = url::Url::parse("https://elsewhere.org/iiif/abc/manifest.json").unwrap();
        assert!(t.match_url(&other).is_none());
    }

    #[test]
    fn rest_placeholder_spans_segments() {
        let t = template("{path*}");
        let url = url::Url::parse("https://example.org/iiif/a/b/c").unwrap();
        assert_eq!(t.match_url(&url).as_deref(), Some("manifests/a/b/c"));
        assert_eq!(
            t.generate_url("manifests/a/b/c").as_deref(),
            Some("https://example.org/iiif/a/b/c")
        );
    }

    #[test]
    fn unclosed_placeholder_is_config_error() {
        let err = SlugTemplate::compile(
            "bad",
            &SlugTemplateConfig {
                resource_type: ResourceType::Manifest,
                domain: "x".into(),
                prefix: String::new(),
                pattern: "{id".into(),
                slug_prefix: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, HssError::Config { .. }));
    }
}
