//! URL normalization: the identity key used for dedup comparison.
//!
//! The key is `host[:port]/path[?query]` with the scheme, fragment, `www.`
//! prefix, trailing slash and tracking parameters removed. Only the
//! identity-bearing query parameters in [`KEPT_PARAMS`] survive, sorted.
//! Normalizing a key again returns it unchanged.

use url::Url;

/// Query parameters that identify content rather than track clicks.
const KEPT_PARAMS: &[&str] = &["v", "id", "p"];

/// Hosts that serve the same content under another name.
const HOST_ALIASES: &[(&str, &str)] = &[
    ("m.youtube.com", "youtube.com"),
    ("youtu.be", "youtube.com"),
    ("old.reddit.com", "reddit.com"),
    ("new.reddit.com", "reddit.com"),
    ("mobile.twitter.com", "twitter.com"),
    ("x.com", "twitter.com"),
];

/// Produce the normalized identity key for a source URL.
///
/// Never fails: input that does not parse as a URL (even after assuming
/// `https://`) falls back to a trimmed, lower-cased copy.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match parse_lenient(trimmed) {
        Some(url) => key_from_url(&url),
        None => fallback_key(trimmed),
    }
}

fn parse_lenient(raw: &str) -> Option<Url> {
    if raw.is_empty() {
        return None;
    }
    let retry_with_scheme = match Url::parse(raw) {
        Ok(url) if url.host_str().is_some() => return Some(url),
        // `example.com:8080/a` parses with `example.com` as the scheme
        Ok(url) => url.scheme().contains('.'),
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    };
    if !retry_with_scheme {
        return None;
    }
    Url::parse(&format!("https://{raw}"))
        .ok()
        .filter(|url| url.host_str().is_some())
}

fn key_from_url(url: &Url) -> String {
    let raw_host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = raw_host.strip_prefix("www.").unwrap_or(&raw_host);

    let mut path = url.path().to_string();
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| KEPT_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    // youtu.be/<id> is youtube.com/watch?v=<id>
    if host == "youtu.be" {
        let video = path.trim_matches('/').to_string();
        if !video.is_empty() {
            path = "/watch".into();
            params.retain(|(k, _)| k != "v");
            params.push(("v".into(), video));
        }
    }

    let host = HOST_ALIASES
        .iter()
        .find(|(alias, _)| *alias == host)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(host);

    params.sort();

    let mut key = host.to_string();
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(path.trim_end_matches('/'));

    if !params.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        key.push('?');
        key.push_str(&query);
    }
    key
}

fn fallback_key(raw: &str) -> String {
    let without_fragment = raw.split('#').next().unwrap_or_default();
    without_fragment.trim_end_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_www_and_trailing_slash() {
        assert_eq!(normalize_url("https://www.Example.com/blog/"), "example.com/blog");
        assert_eq!(normalize_url("http://example.com/blog"), "example.com/blog");
    }

    #[test]
    fn drops_fragment_and_tracking_params() {
        assert_eq!(
            normalize_url("https://example.com/post?utm_source=x&fbclid=abc&ref=hn#comments"),
            "example.com/post"
        );
    }

    #[test]
    fn keeps_identity_params_sorted() {
        assert_eq!(
            normalize_url("https://news.ycombinator.com/item?utm_medium=rss&id=42"),
            "news.ycombinator.com/item?id=42"
        );
        assert_eq!(
            normalize_url("https://example.com/?p=3&id=9"),
            "example.com?id=9&p=3"
        );
    }

    #[test]
    fn applies_host_aliases() {
        assert_eq!(
            normalize_url("https://youtu.be/dQw4w9WgXcQ?si=tracking"),
            "youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            normalize_url("https://m.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            "youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            normalize_url("https://old.reddit.com/r/rust/comments/1/"),
            "reddit.com/r/rust/comments/1"
        );
        assert_eq!(normalize_url("https://x.com/user/status/1"), "twitter.com/user/status/1");
    }

    #[test]
    fn keeps_path_case_and_port() {
        assert_eq!(normalize_url("https://Example.com:8443/A/B"), "example.com:8443/A/B");
        assert_eq!(normalize_url("https://example.com:443/a"), "example.com/a");
    }

    #[test]
    fn is_idempotent() {
        let inputs = [
            "https://www.example.com/a/b/?utm_source=x",
            "https://news.ycombinator.com/item?id=42&utm_campaign=y",
            "https://youtu.be/abc123",
            "https://example.com/",
            "https://example.com/?p=3&id=9",
            "not a url at all/",
            "",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "input: {input}");
        }
    }

    #[test]
    fn malformed_input_is_best_effort() {
        assert_eq!(normalize_url("  Not A URL/  "), "not a url");
        assert_eq!(normalize_url(""), "");
        assert_eq!(normalize_url("mailto:someone@example.com"), "mailto:someone@example.com");
    }
}
