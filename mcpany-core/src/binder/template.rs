//! URL template pre-parsing.
//!
//! Templates have the shape `"METHOD scheme://host/path?query"` with
//! `{{name}}` placeholders in the path and query. The template is split once
//! at tool construction into literal/placeholder segments for path and query
//! independently; per-call binding only walks the segment lists.

use crate::error::{Error, Result};

/// One span of a path or query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed URL template, immutable after construction.
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    pub method: String,
    /// `scheme://authority`, never containing placeholders.
    pub base: String,
    pub path: Vec<Segment>,
    pub query: Vec<Segment>,
}

impl UrlTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let trimmed = template.trim();
        let (method, rest) = trimmed.split_once(char::is_whitespace).ok_or_else(|| {
            Error::InitializationFailed {
                name: template.to_string(),
                reason: "URL template must be \"METHOD url\"".into(),
            }
        })?;

        let method = method.to_ascii_uppercase();
        // Templates may be URL-literal: encoded braces are normalized before
        // segmentation so `%7Bname%7D` and `{{name}}` read the same.
        let url = rest
            .trim()
            .replace("%7B", "{")
            .replace("%7b", "{")
            .replace("%7D", "}")
            .replace("%7d", "}");

        let scheme_end = url.find("://").ok_or_else(|| Error::InitializationFailed {
            name: template.to_string(),
            reason: "URL template is missing a scheme".into(),
        })?;

        let authority_start = scheme_end + 3;
        let after_authority = url[authority_start..]
            .find(['/', '?'])
            .map(|offset| authority_start + offset)
            .unwrap_or(url.len());

        let base = url[..after_authority].to_string();
        // The authority carries no placeholders, so it must already be a
        // well-formed origin.
        url::Url::parse(&base).map_err(|err| Error::InitializationFailed {
            name: template.to_string(),
            reason: format!("invalid URL base {base:?}: {err}"),
        })?;
        let remainder = &url[after_authority..];

        let (path_part, query_part) = match remainder.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (remainder, None),
        };

        Ok(Self {
            method,
            base,
            path: split_segments(path_part),
            query: query_part.map(split_segments).unwrap_or_default(),
        })
    }

    /// Names of placeholders appearing in the path.
    pub fn path_placeholders(&self) -> impl Iterator<Item = &str> {
        self.path.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Names of placeholders appearing in the query.
    pub fn query_placeholders(&self) -> impl Iterator<Item = &str> {
        self.query.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

fn split_segments(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        literal.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(after_open[..close].trim().to_string()));
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated braces read as literal text.
                literal.push_str("{{");
                rest = after_open;
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_method_base_path_query() {
        let template =
            UrlTemplate::parse("GET https://api.example.com/users/{{id}}?fields={{fields}}")
                .unwrap();
        assert_eq!(template.method, "GET");
        assert_eq!(template.base, "https://api.example.com");
        assert_eq!(
            template.path,
            vec![
                Segment::Literal("/users/".into()),
                Segment::Placeholder("id".into()),
            ]
        );
        assert_eq!(
            template.query,
            vec![
                Segment::Literal("fields=".into()),
                Segment::Placeholder("fields".into()),
            ]
        );
    }

    #[test]
    fn normalizes_encoded_braces() {
        let template =
            UrlTemplate::parse("GET https://api.example.com/users/%7B%7Bid%7D%7D").unwrap();
        assert_eq!(
            template.path,
            vec![
                Segment::Literal("/users/".into()),
                Segment::Placeholder("id".into()),
            ]
        );
    }

    #[test]
    fn collects_placeholder_names() {
        let template =
            UrlTemplate::parse("POST https://h.example/{{a}}/x/{{b}}?q={{c}}").unwrap();
        let path: Vec<&str> = template.path_placeholders().collect();
        assert_eq!(path, vec!["a", "b"]);
        let query: Vec<&str> = template.query_placeholders().collect();
        assert_eq!(query, vec!["c"]);
    }

    #[test]
    fn bare_host_has_empty_path() {
        let template = UrlTemplate::parse("GET https://api.example.com").unwrap();
        assert!(template.path.is_empty());
        assert!(template.query.is_empty());
    }

    #[test]
    fn method_is_uppercased() {
        let template = UrlTemplate::parse("post https://h.example/x").unwrap();
        assert_eq!(template.method, "POST");
    }

    #[test]
    fn missing_method_or_scheme_fails() {
        assert!(UrlTemplate::parse("https://h.example/x").is_err());
        assert!(UrlTemplate::parse("GET h.example/x").is_err());
    }

    #[test]
    fn unterminated_braces_stay_literal() {
        let template = UrlTemplate::parse("GET https://h.example/a{{b").unwrap();
        assert_eq!(template.path, vec![Segment::Literal("/a{{b".into())]);
    }
}
