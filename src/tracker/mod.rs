//! Per-site rule plugins and the registry that maps a site domain to them.
//!
//! A tracker publishes an RSS feed whose items link to a detail page; the
//! detail page carries the authoritative freeleech / hit-and-run badges and
//! the torrent size. A [`Tracker`] knows how to find that detail page inside
//! an item and how to read those badges out of the page markup.
//!
//! [`RulePlugin`] is the pattern-driven implementation used by every built-in
//! site and by the `[[trackers]]` tables of the config file. Sites that need a
//! structured parser can implement [`Tracker`] directly without touching the
//! filtering pipeline.

mod builtin;

use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use builtin::builtin_plugins;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A tracker is already registered for domain {0}")]
    DuplicateDomain(String),
    #[error("No tracker registered for domain {0}")]
    NotFound(String),
    #[error("Invalid pattern for tracker {domain}: {source}")]
    InvalidPattern {
        domain: String,
        #[source]
        source: regex::Error,
    },
}

/// Outcome of looking for a detail page inside a feed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailUrl {
    /// Canonical detail-page URL to verify.
    Found(String),
    /// The item carries nothing that looks like a detail-page link.
    NoMatch,
    /// A link was found but could not be turned into a canonical URL.
    Rejected,
}

/// Site-specific knowledge about a tracker's feed items and detail pages.
pub trait Tracker: Send + Sync {
    /// Domain key, e.g. `chdbits.co`.
    fn domain(&self) -> &str;

    /// Locates the detail page for an item given its serialized markup.
    fn detail_url(&self, item_markup: &str) -> DetailUrl;

    /// `None` when the site has no freeleech badge to test for.
    fn is_free_leech(&self, page: &str) -> Option<bool>;

    /// `None` when the site has no hit-and-run badge to test for.
    fn is_hit_and_run(&self, page: &str) -> Option<bool>;

    /// The raw size text ("4.37 GB") shown on the detail page, if found.
    fn size_text(&self, page: &str) -> Option<String>;

    /// Rewrites an enclosure (download) URL, e.g. to skip a redirect page.
    fn transform_enclosure(&self, url: &str) -> String {
        url.to_string()
    }
}

/// Turns a detail-page pattern match into a canonical URL, or `None` to drop the item.
pub type DetailUrlTransformer = fn(&Captures<'_>) -> Option<String>;

/// Rewrites a download link found in an item's enclosure.
pub type EnclosureTransformer = fn(&str) -> String;

/// A tracker described entirely by patterns over raw page markup.
#[derive(Clone)]
pub struct RulePlugin {
    domain: String,
    detail_page: Regex,
    detail_page_transformer: Option<DetailUrlTransformer>,
    free_leech: Option<Regex>,
    hit_and_run: Option<Regex>,
    size_field: Option<Regex>,
    enclosure_transformer: Option<EnclosureTransformer>,
}

impl fmt::Debug for RulePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RulePlugin")
            .field("domain", &self.domain)
            .field("detail_page", &self.detail_page.as_str())
            .field("free_leech", &self.free_leech.as_ref().map(Regex::as_str))
            .field("hit_and_run", &self.hit_and_run.as_ref().map(Regex::as_str))
            .field("size_field", &self.size_field.as_ref().map(Regex::as_str))
            .finish_non_exhaustive()
    }
}

impl RulePlugin {
    /// Starts a plugin from its domain and detail-page pattern.
    ///
    /// Without a transformer the whole match is used as the detail URL.
    pub fn new(domain: &str, detail_page: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            domain: domain.to_ascii_lowercase(),
            detail_page: compile(domain, detail_page)?,
            detail_page_transformer: None,
            free_leech: None,
            hit_and_run: None,
            size_field: None,
            enclosure_transformer: None,
        })
    }

    pub fn with_free_leech(mut self, pattern: &str) -> Result<Self, RegistryError> {
        self.free_leech = Some(compile(&self.domain, pattern)?);
        Ok(self)
    }

    pub fn with_hit_and_run(mut self, pattern: &str) -> Result<Self, RegistryError> {
        self.hit_and_run = Some(compile(&self.domain, pattern)?);
        Ok(self)
    }

    /// The first capture group of `pattern` must hold the size text.
    pub fn with_size_field(mut self, pattern: &str) -> Result<Self, RegistryError> {
        self.size_field = Some(compile(&self.domain, pattern)?);
        Ok(self)
    }

    pub fn with_detail_page_transformer(mut self, transformer: DetailUrlTransformer) -> Self {
        self.detail_page_transformer = Some(transformer);
        self
    }

    pub fn with_enclosure_transformer(mut self, transformer: EnclosureTransformer) -> Self {
        self.enclosure_transformer = Some(transformer);
        self
    }

    /// Builds a plugin from a `[[trackers]]` table of the config file.
    pub fn from_definition(def: &TrackerDefinition) -> Result<Self, RegistryError> {
        let mut plugin = Self::new(&def.domain, &def.detail_page)?;
        if let Some(pattern) = &def.free_leech {
            plugin = plugin.with_free_leech(pattern)?;
        }
        if let Some(pattern) = &def.hit_and_run {
            plugin = plugin.with_hit_and_run(pattern)?;
        }
        if let Some(pattern) = &def.size_field {
            plugin = plugin.with_size_field(pattern)?;
        }
        Ok(plugin)
    }
}

fn compile(domain: &str, pattern: &str) -> Result<Regex, RegistryError> {
    Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
        domain: domain.to_string(),
        source,
    })
}

impl Tracker for RulePlugin {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn detail_url(&self, item_markup: &str) -> DetailUrl {
        let Some(caps) = self.detail_page.captures(item_markup) else {
            return DetailUrl::NoMatch;
        };
        match self.detail_page_transformer {
            Some(transform) => match transform(&caps) {
                Some(url) => DetailUrl::Found(url),
                None => DetailUrl::Rejected,
            },
            None => DetailUrl::Found(caps[0].to_string()),
        }
    }

    fn is_free_leech(&self, page: &str) -> Option<bool> {
        self.free_leech.as_ref().map(|re| re.is_match(page))
    }

    fn is_hit_and_run(&self, page: &str) -> Option<bool> {
        self.hit_and_run.as_ref().map(|re| re.is_match(page))
    }

    fn size_text(&self, page: &str) -> Option<String> {
        let caps = self.size_field.as_ref()?.captures(page)?;
        caps.get(1).map(|m| m.as_str().to_string())
    }

    fn transform_enclosure(&self, url: &str) -> String {
        match self.enclosure_transformer {
            Some(transform) => transform(url),
            None => url.to_string(),
        }
    }
}

/// Declarative tracker definition, as written in the config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TrackerDefinition {
    pub domain: String,
    pub detail_page: String,
    #[serde(default)]
    pub free_leech: Option<String>,
    #[serde(default)]
    pub hit_and_run: Option<String>,
    #[serde(default)]
    pub size_field: Option<String>,
}

/// Immutable domain → tracker table, populated once at startup.
#[derive(Default, Clone)]
pub struct TrackerRegistry {
    trackers: HashMap<String, Arc<dyn Tracker>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tracker.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for plugin in builtin_plugins()? {
            registry.register(plugin)?;
        }
        Ok(registry)
    }

    pub fn register<T: Tracker + 'static>(&mut self, tracker: T) -> Result<(), RegistryError> {
        let domain = tracker.domain().to_ascii_lowercase();
        if self.trackers.contains_key(&domain) {
            return Err(RegistryError::DuplicateDomain(domain));
        }
        tracing::info!(domain = %domain, "Loaded tracker");
        self.trackers.insert(domain, Arc::new(tracker));
        Ok(())
    }

    pub fn lookup(&self, domain: &str) -> Result<Arc<dyn Tracker>, RegistryError> {
        self.trackers
            .get(&domain.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(domain.to_string()))
    }

    pub fn domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.trackers.keys().map(String::as_str).collect();
        domains.sort_unstable();
        domains
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_plugin() -> RulePlugin {
        RulePlugin::new("Example.org", r"https?://example\.org/details\.php\?id=(\d+)")
            .unwrap()
            .with_free_leech("pro_free")
            .unwrap()
            .with_size_field(r"Size:\s*([\d.]+\s*[GMK]i?B)")
            .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TrackerRegistry::new();
        registry.register(example_plugin()).unwrap();

        let tracker = registry.lookup("example.org").unwrap();
        assert_eq!(tracker.domain(), "example.org");
        assert!(registry.lookup("EXAMPLE.ORG").is_ok());
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let mut registry = TrackerRegistry::new();
        registry.register(example_plugin()).unwrap();

        let err = registry.register(example_plugin()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateDomain(d) if d == "example.org"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_domain() {
        let registry = TrackerRegistry::new();
        assert!(matches!(
            registry.lookup("nowhere.net"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_detail_url_whole_match_without_transformer() {
        let plugin = example_plugin();
        let item = r#"<item><link>https://example.org/details.php?id=42&amp;hit=1</link></item>"#;
        assert_eq!(
            plugin.detail_url(item),
            DetailUrl::Found("https://example.org/details.php?id=42".to_string())
        );
        assert_eq!(plugin.detail_url("<item></item>"), DetailUrl::NoMatch);
    }

    #[test]
    fn test_detail_url_transformer_can_reject() {
        fn only_even(caps: &Captures<'_>) -> Option<String> {
            let id: u32 = caps[1].parse().ok()?;
            (id % 2 == 0).then(|| format!("https://example.org/t/{id}"))
        }
        let plugin = example_plugin().with_detail_page_transformer(only_even);

        assert_eq!(
            plugin.detail_url("https://example.org/details.php?id=8"),
            DetailUrl::Found("https://example.org/t/8".to_string())
        );
        assert_eq!(
            plugin.detail_url("https://example.org/details.php?id=7"),
            DetailUrl::Rejected
        );
    }

    #[test]
    fn test_optional_indicators() {
        let plugin = example_plugin();
        assert_eq!(plugin.is_free_leech("<span class='pro_free'>"), Some(true));
        assert_eq!(plugin.is_free_leech("<span>"), Some(false));
        assert_eq!(plugin.is_hit_and_run("anything"), None);
        assert_eq!(
            plugin.size_text("<td>Size: 1.5 GiB</td>").as_deref(),
            Some("1.5 GiB")
        );
        assert_eq!(plugin.size_text("<td>no size</td>"), None);
    }

    #[test]
    fn test_from_definition() {
        let def: TrackerDefinition = toml::from_str(
            r#"
domain = "example.org"
detail_page = "details\\.php\\?id=\\d+"
hit_and_run = "hit_run\\.gif"
"#,
        )
        .unwrap();
        let plugin = RulePlugin::from_definition(&def).unwrap();
        assert_eq!(plugin.is_hit_and_run("/pic/hit_run.gif"), Some(true));
        assert_eq!(plugin.is_free_leech("x"), None);
    }

    #[test]
    fn test_invalid_pattern_reports_domain() {
        let err = RulePlugin::new("broken.net", "(unclosed").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { ref domain, .. } if domain == "broken.net"));
    }

    #[test]
    fn test_builtin_registry() {
        let registry = TrackerRegistry::with_builtin().unwrap();
        assert_eq!(
            registry.domains(),
            vec!["chdbits.co", "totheglory.im", "u2.dmhy.org"]
        );
    }
}
