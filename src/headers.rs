//! Raw header block parsing and the outgoing header merge rule
//!
//! Request headers arrive as raw text, one `name: value` pair per line.
//! Outgoing headers are merged from two sources: the dispatcher's fixed
//! (appended) header list is applied first, then the per-request block,
//! skipping any name the fixed list already set. When the body is multipart
//! form data a caller-supplied `content-type` is dropped so the client can
//! set the boundary itself. An individual header that fails to parse is
//! skipped; the remaining headers still apply.

use http::{HeaderMap, HeaderName, HeaderValue};

/// Parse a raw header block into name/value pairs.
///
/// Literal `\n` sequences (as they appear in attribute-style configuration)
/// are normalized to newlines first. A line without a colon becomes a name
/// with an empty value. Blank lines are ignored.
pub fn parse_header_block(block: &str) -> Vec<(String, String)> {
    let block = block.replace("\\n", "\n");
    let mut pairs = Vec::new();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                pairs.push((name.trim().to_string(), value.trim().to_string()));
            }
            None => pairs.push((line.to_string(), String::new())),
        }
    }
    pairs
}

/// Merge the fixed header list with the per-request headers.
///
/// Fixed headers win name conflicts. `multipart` suppresses any caller
/// `content-type` header.
pub(crate) fn merge_request_headers(
    fixed: &[(String, String)],
    request: &[(String, String)],
    multipart: bool,
) -> HeaderMap {
    let mut merged = HeaderMap::new();
    let mut fixed_names: Vec<String> = Vec::with_capacity(fixed.len());

    for (name, value) in fixed {
        fixed_names.push(name.to_ascii_lowercase());
        append_header(&mut merged, name, value);
    }

    for (name, value) in request {
        if fixed_names.contains(&name.to_ascii_lowercase()) {
            continue;
        }
        if multipart && name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        append_header(&mut merged, name, value);
    }

    merged
}

fn append_header(map: &mut HeaderMap, name: &str, value: &str) {
    let name = match name.parse::<HeaderName>() {
        Ok(name) => name,
        Err(error) => {
            tracing::debug!(header = name, %error, "skipping invalid header name");
            return;
        }
    };
    let value = match value.parse::<HeaderValue>() {
        Ok(value) => value,
        Err(error) => {
            tracing::debug!(header = %name, %error, "skipping invalid header value");
            return;
        }
    };
    map.append(name, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(input: &[(&str, &str)]) -> Vec<(String, String)> {
        input
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_header_block() {
        let parsed = parse_header_block("x-token: 123\nx-api-demo: true");
        assert_eq!(
            parsed,
            pairs(&[("x-token", "123"), ("x-api-demo", "true")])
        );
    }

    #[test]
    fn test_parse_header_block_literal_newline() {
        let parsed = parse_header_block("x-token: 123\\nx-api-demo: true");
        assert_eq!(
            parsed,
            pairs(&[("x-token", "123"), ("x-api-demo", "true")])
        );
    }

    #[test]
    fn test_parse_header_block_no_colon_and_blank_lines() {
        let parsed = parse_header_block("x-flag\n\n  \nx-name: value");
        assert_eq!(parsed, pairs(&[("x-flag", ""), ("x-name", "value")]));
    }

    #[test]
    fn test_parse_header_block_value_with_colon() {
        let parsed = parse_header_block("referer: http://domain.com/path");
        assert_eq!(parsed, pairs(&[("referer", "http://domain.com/path")]));
    }

    #[test]
    fn test_fixed_headers_win() {
        let fixed = pairs(&[("A", "1")]);
        let request = pairs(&[("A", "2"), ("B", "3")]);

        let merged = merge_request_headers(&fixed, &request, false);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("a").unwrap(), "1");
        assert_eq!(merged.get("b").unwrap(), "3");
    }

    #[test]
    fn test_multipart_drops_content_type() {
        let request = pairs(&[("content-type", "text/plain"), ("x-other", "1")]);

        let merged = merge_request_headers(&[], &request, true);

        assert!(!merged.contains_key("content-type"));
        assert_eq!(merged.get("x-other").unwrap(), "1");
    }

    #[test]
    fn test_content_type_kept_without_multipart() {
        let request = pairs(&[("Content-Type", "text/plain")]);

        let merged = merge_request_headers(&[], &request, false);

        assert_eq!(merged.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn test_invalid_header_is_skipped_not_fatal() {
        let request = pairs(&[("bad name", "1"), ("x-good", "2")]);

        let merged = merge_request_headers(&[], &request, false);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("x-good").unwrap(), "2");
    }

    #[test]
    fn test_repeated_request_header_appends() {
        let request = pairs(&[("x-many", "1"), ("x-many", "2")]);

        let merged = merge_request_headers(&[], &request, false);

        let values: Vec<_> = merged.get_all("x-many").iter().collect();
        assert_eq!(values.len(), 2);
    }
}
