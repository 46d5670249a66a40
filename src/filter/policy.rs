use regex::Regex;
use secrecy::SecretString;
use std::fmt;

/// A regex rewrite applied to enclosure URLs before they are published.
#[derive(Clone)]
pub struct EnclosureRewrite {
    pub pattern: Regex,
    pub replacement: String,
}

impl EnclosureRewrite {
    pub fn apply(&self, url: &str) -> String {
        self.pattern
            .replace(url, self.replacement.as_str())
            .into_owned()
    }
}

impl fmt::Debug for EnclosureRewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnclosureRewrite")
            .field("pattern", &self.pattern.as_str())
            .field("replacement", &self.replacement)
            .finish()
    }
}

/// What a site's operator wants kept, plus the credentials to check it.
///
/// Built from the `[sites."<domain>"]` tables of the config file.
pub struct SitePolicy {
    /// Cookie header sent to the tracker for detail pages and proxied downloads.
    pub cookie: SecretString,
    pub only_when_free_leech: bool,
    pub only_when_not_hr: bool,
    /// `None` = unlimited.
    pub max_size_mb: Option<f64>,
    /// Publish enclosure links that point back at this service's `/proxy`.
    pub always_proxy: bool,
    /// Base URL used to build proxy links; falls back to the global setting.
    pub public_base_url: Option<String>,
    /// Takes precedence over the tracker's own enclosure transformer.
    pub enclosure_rewrite: Option<EnclosureRewrite>,
    /// Keep items whose detail page cannot be located instead of dropping them.
    pub keep_unmatched: bool,
}

impl SitePolicy {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: SecretString::from(cookie.into()),
            only_when_free_leech: false,
            only_when_not_hr: false,
            max_size_mb: None,
            always_proxy: false,
            public_base_url: None,
            enclosure_rewrite: None,
            keep_unmatched: false,
        }
    }
}

impl fmt::Debug for SitePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SitePolicy")
            .field("cookie", &"[REDACTED]")
            .field("only_when_free_leech", &self.only_when_free_leech)
            .field("only_when_not_hr", &self.only_when_not_hr)
            .field("max_size_mb", &self.max_size_mb)
            .field("always_proxy", &self.always_proxy)
            .field("public_base_url", &self.public_base_url)
            .field("enclosure_rewrite", &self.enclosure_rewrite)
            .field("keep_unmatched", &self.keep_unmatched)
            .finish()
    }
}
