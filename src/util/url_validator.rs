use thiserror::Error;
use url::Url;

/// Errors that can occur while turning an inbound request into a feed URL.
#[derive(Error, Debug)]
pub enum FeedUrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    Invalid(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component to derive a site domain from.
    #[error("URL has no host")]
    MissingHost,
    /// The request path was not valid percent-encoded UTF-8.
    #[error("Malformed percent-encoding in request path")]
    Encoding,
}

/// A validated feed URL together with the site domain it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUrl {
    pub url: Url,
    /// Lowercased host, used as the rule plugin / site policy key.
    pub domain: String,
}

/// Decodes the path of a filter request (`/<percent-encoded feed URL>`).
///
/// The leading slash is stripped and the remainder is percent-decoded. A query
/// string that was not encoded by the client is kept, so both
/// `/https%3A%2F%2Fsite%2Frss.php%3Fpasskey%3Dx` and
/// `/https://site/rss.php?passkey=x` resolve to the same feed URL.
pub fn decode_request_path(path_and_query: &str) -> Result<String, FeedUrlError> {
    let raw = path_and_query.strip_prefix('/').unwrap_or(path_and_query);
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| FeedUrlError::Encoding)
}

/// Parses a feed URL and extracts its site domain.
///
/// # Examples
///
/// ```
/// use leechfeed::util::validate_feed_url;
///
/// let feed = validate_feed_url("https://chdbits.co/torrentrss.php?rows=10").unwrap();
/// assert_eq!(feed.domain, "chdbits.co");
///
/// assert!(validate_feed_url("ftp://chdbits.co/rss").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<FeedUrl, FeedUrlError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    let domain = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(FeedUrlError::MissingHost)?
        .to_ascii_lowercase();

    Ok(FeedUrl { url, domain })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_encoded_path() {
        let decoded =
            decode_request_path("/https%3A%2F%2Fchdbits.co%2Ftorrentrss.php%3Frows%3D10").unwrap();
        assert_eq!(decoded, "https://chdbits.co/torrentrss.php?rows=10");
    }

    #[test]
    fn test_decode_unencoded_path() {
        let decoded = decode_request_path("/https://u2.dmhy.org/torrentrss.php?passkey=abc").unwrap();
        assert_eq!(decoded, "https://u2.dmhy.org/torrentrss.php?passkey=abc");
    }

    #[test]
    fn test_decode_invalid_utf8_rejected() {
        assert!(matches!(
            decode_request_path("/%FF%FE"),
            Err(FeedUrlError::Encoding)
        ));
    }

    #[test]
    fn test_domain_extracted_from_host() {
        let feed = validate_feed_url("https://U2.DMHY.org/torrentrss.php").unwrap();
        assert_eq!(feed.domain, "u2.dmhy.org");
    }

    #[test]
    fn test_domain_ignores_port_and_path() {
        let feed = validate_feed_url("http://127.0.0.1:8080/a/b/rss.xml").unwrap();
        assert_eq!(feed.domain, "127.0.0.1");
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(FeedUrlError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("ftp://example.com/rss").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validate_feed_url("not a url"),
            Err(FeedUrlError::Invalid(_))
        ));
    }
}
