use regex::Regex;

/// First match of `regex` in `haystack`: the capture group if the pattern has one, otherwise
/// the whole match. A group that did not take part in the match yields an empty string.
pub fn extract_match(regex: &Regex, haystack: &str) -> Option<String> {
    let caps = regex.captures(haystack)?;
    let value = if regex.captures_len() > 1 {
        caps.get(1).map_or("", |m| m.as_str())
    } else {
        caps.get(0).map_or("", |m| m.as_str())
    };
    Some(value.to_string())
}
