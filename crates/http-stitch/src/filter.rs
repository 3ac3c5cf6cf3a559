//! Header-predicate filtering for emitted records

use http::HeaderMap;

/// One `(header name, value substring)` predicate.
#[derive(Debug, Clone)]
pub struct HeaderMatch {
    /// Header name, matched case-insensitively.
    pub name:   String,
    /// Substring that must occur in the header's value.
    pub substr: String,
}

impl HeaderMatch {
    /// Build a predicate.
    pub fn new(name: impl Into<String>, substr: impl Into<String>) -> Self {
        Self {
            name:   name.into(),
            substr: substr.into(),
        }
    }
}

/// Accept/reject predicate over a message's headers.
///
/// A message passes when at least one inclusion matches (an empty inclusion
/// list accepts everything) and no exclusion matches. Matching is substring
/// containment over the header value; multi-valued headers match if any
/// value does.
#[derive(Debug, Clone)]
pub struct HttpHeaderFilter {
    /// At least one must match, unless empty.
    pub inclusions: Vec<HeaderMatch>,
    /// None may match.
    pub exclusions: Vec<HeaderMatch>,
}

impl Default for HttpHeaderFilter {
    /// The stock deployment filter: JSON responses in, gzip-compressed
    /// bodies out.
    fn default() -> Self {
        Self {
            inclusions: vec![HeaderMatch::new("Content-Type", "json")],
            exclusions: vec![HeaderMatch::new("Content-Encoding", "gzip")],
        }
    }
}

impl HttpHeaderFilter {
    /// A filter that accepts everything.
    pub fn accept_all() -> Self {
        Self {
            inclusions: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    /// Whether `headers` pass this filter.
    pub fn matches(&self, headers: &HeaderMap) -> bool {
        if !self.inclusions.is_empty() && !any_match(&self.inclusions, headers) {
            return false;
        }
        !any_match(&self.exclusions, headers)
    }
}

fn any_match(predicates: &[HeaderMatch], headers: &HeaderMap) -> bool {
    predicates.iter().any(|p| {
        headers
            .get_all(p.name.as_str())
            .iter()
            .any(|value| value.to_str().is_ok_and(|v| v.contains(&p.substr)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.append(name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn default_filter_selects_json() {
        let filter = HttpHeaderFilter::default();
        assert!(filter.matches(&headers(&[("content-type", "application/json; charset=utf-8")])));
        assert!(!filter.matches(&headers(&[("content-type", "text/plain; charset=utf-8")])));
    }

    #[test]
    fn exclusion_overrides_inclusion() {
        let filter = HttpHeaderFilter::default();
        assert!(!filter.matches(&headers(&[
            ("content-type", "application/json"),
            ("content-encoding", "gzip"),
        ])));
    }

    #[test]
    fn empty_inclusions_accept_everything() {
        let filter = HttpHeaderFilter::accept_all();
        assert!(filter.matches(&headers(&[])));
        assert!(filter.matches(&headers(&[("content-type", "text/plain")])));
    }

    #[test]
    fn missing_header_fails_inclusion() {
        let filter = HttpHeaderFilter::default();
        assert!(!filter.matches(&headers(&[("content-length", "3")])));
    }

    #[test]
    fn multi_valued_header_matches_any_value() {
        let filter = HttpHeaderFilter {
            inclusions: vec![HeaderMatch::new("Accept", "html")],
            exclusions: Vec::new(),
        };
        assert!(filter.matches(&headers(&[("accept", "application/json"), ("accept", "text/html")])));
    }
}
