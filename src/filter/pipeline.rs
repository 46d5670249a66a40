use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::cache::DecisionCache;
use super::eligibility::{evaluate, Verdict};
use super::policy::SitePolicy;
use super::scheduler::VerificationScheduler;
use crate::feed::{parse_feed, FeedItem, Fetcher};
use crate::proxy::ProxyCache;
use crate::tracker::{DetailUrl, Tracker, TrackerRegistry};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("No site policy configured for {0}")]
    NoPolicy(String),
    #[error("No tracker plugin registered for {0}")]
    NoTracker(String),
}

/// Outcome of one detail-page check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Accepted,
    Rejected,
    /// The page could not be fetched; nothing was cached.
    Failed,
}

/// A detail-page check that concurrent requests can all await.
type PendingCheck = Shared<BoxFuture<'static, Check>>;

/// Everything needed to judge items of one site.
struct Site<'a> {
    domain: &'a str,
    tracker: Arc<dyn Tracker>,
    policy: Arc<SitePolicy>,
}

/// The filtering pipeline shared by every inbound feed request.
///
/// Decision cache, proxy cache and scheduler are shared across concurrent
/// calls, so a verdict reached for one caller's feed is reused for another's.
/// A detail page that is already being checked is not fetched a second time;
/// later callers wait for the running check instead.
pub struct FeedFilter {
    registry: TrackerRegistry,
    policies: HashMap<String, Arc<SitePolicy>>,
    decisions: Arc<DecisionCache>,
    scheduler: VerificationScheduler,
    pending: Arc<Mutex<HashMap<String, PendingCheck>>>,
    proxy: Arc<ProxyCache>,
    fetcher: Arc<dyn Fetcher>,
    public_base_url: Option<String>,
}

impl FeedFilter {
    pub fn new(registry: TrackerRegistry, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            registry,
            policies: HashMap::new(),
            decisions: Arc::new(DecisionCache::new()),
            scheduler: VerificationScheduler::default(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            proxy: Arc::new(ProxyCache::new()),
            fetcher,
            public_base_url: None,
        }
    }

    pub fn with_policy(mut self, domain: &str, policy: SitePolicy) -> Self {
        self.policies
            .insert(domain.to_ascii_lowercase(), Arc::new(policy));
        self
    }

    pub fn with_decision_cache(mut self, decisions: Arc<DecisionCache>) -> Self {
        self.decisions = decisions;
        self
    }

    pub fn with_scheduler(mut self, scheduler: VerificationScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_proxy_cache(mut self, proxy: Arc<ProxyCache>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Default base for proxy links when a site sets none.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    pub fn policy(&self, domain: &str) -> Option<&Arc<SitePolicy>> {
        self.policies.get(&domain.to_ascii_lowercase())
    }

    pub fn decisions(&self) -> &DecisionCache {
        &self.decisions
    }

    pub fn proxy_cache(&self) -> &ProxyCache {
        &self.proxy
    }

    pub fn scheduler(&self) -> &VerificationScheduler {
        &self.scheduler
    }

    /// Fetches `feed_url` and returns it with ineligible items removed.
    ///
    /// Fails only when the domain is not configured. A feed that cannot be
    /// fetched or parsed yields an empty body.
    pub async fn filter(&self, domain: &str, feed_url: &str) -> Result<String, FilterError> {
        let policy = self
            .policy(domain)
            .cloned()
            .ok_or_else(|| FilterError::NoPolicy(domain.to_string()))?;
        let tracker = self
            .registry
            .lookup(domain)
            .map_err(|_| FilterError::NoTracker(domain.to_string()))?;
        let site = Site {
            domain,
            tracker,
            policy,
        };

        let source = match self.fetcher.fetch_text(feed_url, None).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(url = %feed_url, error = %e, "Failed to fetch feed");
                return Ok(String::new());
            }
        };
        let document = match parse_feed(&source) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(url = %feed_url, error = %e, "Failed to parse feed");
                return Ok(String::new());
            }
        };

        let total = document.items().len();
        let finished = AtomicUsize::new(0);
        let (site, finished) = (&site, &finished);
        let kept = join_all(document.items().iter().map(|item| async move {
            let result = self.process_item(site, item.clone()).await;
            let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(url = %feed_url, progress = %format!("{done}/{total}"), "Verification progress");
            result
        }))
        .await;

        let retained = kept.iter().flatten().count();
        tracing::info!(
            url = %feed_url,
            domain = %domain,
            total = total,
            retained = retained,
            "Feed filtered"
        );
        Ok(document.render(kept.iter().flatten()))
    }

    async fn process_item(&self, site: &Site<'_>, mut item: FeedItem) -> Option<FeedItem> {
        let enclosure = item.enclosure_url().map(|url| {
            let transformed = match &site.policy.enclosure_rewrite {
                Some(rewrite) => rewrite.apply(&url),
                None => site.tracker.transform_enclosure(&url),
            };
            if transformed != url {
                if let Err(e) = item.set_enclosure_url(&transformed) {
                    tracing::warn!(url = %url, error = %e, "Could not rewrite enclosure");
                }
            }
            transformed
        });

        let detail = match site.tracker.detail_url(item.markup()) {
            DetailUrl::Found(url) => url,
            DetailUrl::NoMatch if site.policy.keep_unmatched => {
                tracing::debug!(domain = %site.domain, "No detail page in item, keeping unchecked");
                return Some(self.publish(site, item, enclosure));
            }
            DetailUrl::NoMatch => {
                tracing::debug!(domain = %site.domain, "No detail page in item, dropping");
                return None;
            }
            DetailUrl::Rejected => {
                tracing::debug!(domain = %site.domain, "Detail page token rejected, dropping");
                return None;
            }
        };

        if self.decisions.is_rejected(&detail) {
            return None;
        }
        if self.decisions.is_accepted(&detail) {
            return Some(self.publish(site, item, enclosure));
        }

        match self.verify(site, detail).await {
            Check::Accepted => Some(self.publish(site, item, enclosure)),
            Check::Rejected | Check::Failed => None,
        }
    }

    /// Waits for the verdict on `detail`, starting a check unless one is
    /// already running.
    async fn verify(&self, site: &Site<'_>, detail: String) -> Check {
        let check = {
            let mut pending = self.pending.lock();
            if let Some(check) = pending.get(&detail).cloned() {
                tracing::debug!(url = %detail, "Joining running check");
                check
            } else {
                let check = self.schedule_check(site, &detail);
                pending.insert(detail, check.clone());
                check
            }
        };
        check.await
    }

    /// Builds one detail-page check for the shared scheduler.
    ///
    /// The verdict is cached inside the task, so it is kept even if every
    /// request that asked for it has gone away.
    fn schedule_check(&self, site: &Site<'_>, detail: &str) -> PendingCheck {
        let fetcher = Arc::clone(&self.fetcher);
        let tracker = Arc::clone(&site.tracker);
        let policy = Arc::clone(&site.policy);
        let decisions = Arc::clone(&self.decisions);
        let running = PendingGuard {
            pending: Arc::clone(&self.pending),
            url: detail.to_string(),
        };

        let task = async move {
            let url = running.url.as_str();
            tracing::info!(url = %url, "Checking detail page");
            let page = match fetcher.fetch_text(url, Some(&policy.cookie)).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Failed to fetch detail page");
                    return Check::Failed;
                }
            };
            match evaluate(&policy, tracker.as_ref(), &page) {
                Verdict::Accept => {
                    decisions.record_accepted(url);
                    tracing::info!(url = %url, "Keeping item");
                    Check::Accepted
                }
                Verdict::Reject(reason) => {
                    let cooldown = decisions.record_rejected(url);
                    tracing::info!(
                        url = %url,
                        retry_in_mins = cooldown.as_secs() / 60,
                        "Rejecting item"
                    );
                    tracing::debug!(url = %url, reason = %reason, "Rejection reason");
                    Check::Rejected
                }
            }
        };

        // Submitted on first poll, after `verify` has released the map.
        let scheduler = self.scheduler.clone();
        let url = detail.to_string();
        async move {
            match scheduler.submit(task).await {
                Ok(check) => check,
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "Verification task failed");
                    Check::Failed
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Registers an accepted item's enclosure with the proxy and, for
    /// always-proxy sites, points the enclosure at this service.
    fn publish(&self, site: &Site<'_>, mut item: FeedItem, enclosure: Option<String>) -> FeedItem {
        let Some(url) = enclosure else {
            return item;
        };
        self.proxy.register(&url, site.domain);

        if site.policy.always_proxy {
            let base = site
                .policy
                .public_base_url
                .as_deref()
                .or(self.public_base_url.as_deref());
            match base {
                Some(base) => {
                    if let Err(e) = item.set_enclosure_url(&proxy_link(base, &url)) {
                        tracing::warn!(url = %url, error = %e, "Could not rewrite enclosure to proxy link");
                    }
                }
                None => {
                    tracing::warn!(domain = %site.domain, "always_proxy is set but no public_base_url is configured");
                }
            }
        }
        item
    }
}

/// Clears a detail URL from the running-check map when its task ends,
/// whether it finished, failed or panicked.
struct PendingGuard {
    pending: Arc<Mutex<HashMap<String, PendingCheck>>>,
    url: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.url);
    }
}

/// Builds the `/proxy` link published in place of `enclosure`.
pub fn proxy_link(base: &str, enclosure: &str) -> String {
    format!(
        "{}/proxy?url={}",
        base.trim_end_matches('/'),
        urlencoding::encode(enclosure)
    )
}
