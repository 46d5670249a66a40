use thiserror::Error;

use super::policy::SitePolicy;
use super::size::parse_size;
use crate::tracker::Tracker;

/// Why a detail page failed the site policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("not freeleech")]
    NotFreeLeech,
    #[error("hit-and-run")]
    HitAndRun,
    #[error("no size field found")]
    SizeMissing,
    #[error("unparsable size {0:?}")]
    SizeUnparsable(String),
    #[error("size {size_mb:.1}MB exceeds limit {limit_mb}MB")]
    TooLarge { size_mb: f64, limit_mb: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Judges a detail page against the site policy.
///
/// Each rule rejects on its own; a badge test is skipped when the tracker
/// defines no pattern for it. The size rule fails closed: with a ceiling
/// configured, a page whose size cannot be found or read is rejected.
pub fn evaluate(policy: &SitePolicy, tracker: &dyn Tracker, page: &str) -> Verdict {
    if policy.only_when_free_leech && tracker.is_free_leech(page) == Some(false) {
        return Verdict::Reject(RejectReason::NotFreeLeech);
    }

    if policy.only_when_not_hr && tracker.is_hit_and_run(page) == Some(true) {
        return Verdict::Reject(RejectReason::HitAndRun);
    }

    if let Some(limit_mb) = policy.max_size_mb {
        let Some(text) = tracker.size_text(page) else {
            return Verdict::Reject(RejectReason::SizeMissing);
        };
        match parse_size(&text) {
            Ok(size_mb) if size_mb > limit_mb => {
                return Verdict::Reject(RejectReason::TooLarge { size_mb, limit_mb });
            }
            Ok(_) => {}
            Err(_) => return Verdict::Reject(RejectReason::SizeUnparsable(text)),
        }
    }

    Verdict::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::RulePlugin;

    fn tracker() -> RulePlugin {
        RulePlugin::new("example.org", r"details\.php\?id=\d+")
            .unwrap()
            .with_free_leech("pro_free")
            .unwrap()
            .with_hit_and_run(r"hit_run\.gif")
            .unwrap()
            .with_size_field(r"Size: ([^<]+)<")
            .unwrap()
    }

    fn strict_policy() -> SitePolicy {
        let mut policy = SitePolicy::new("uid=1");
        policy.only_when_free_leech = true;
        policy.only_when_not_hr = true;
        policy.max_size_mb = Some(5000.0);
        policy
    }

    #[test]
    fn test_accepts_page_meeting_every_rule() {
        let page = "<b class='pro_free'></b> Size: 4.2 GB<br>";
        assert_eq!(evaluate(&strict_policy(), &tracker(), page), Verdict::Accept);
    }

    #[test]
    fn test_rejects_non_freeleech() {
        let page = "Size: 1 GB<br>";
        assert_eq!(
            evaluate(&strict_policy(), &tracker(), page),
            Verdict::Reject(RejectReason::NotFreeLeech)
        );
    }

    #[test]
    fn test_rejects_hit_and_run() {
        let page = "pro_free <img src='/pic/hit_run.gif'> Size: 1 GB<br>";
        assert_eq!(
            evaluate(&strict_policy(), &tracker(), page),
            Verdict::Reject(RejectReason::HitAndRun)
        );
    }

    #[test]
    fn test_rejects_oversized() {
        let page = "pro_free Size: 5.5 GB<br>";
        let verdict = evaluate(&strict_policy(), &tracker(), page);
        assert!(matches!(
            verdict,
            Verdict::Reject(RejectReason::TooLarge { limit_mb, .. }) if limit_mb == 5000.0
        ));
    }

    #[test]
    fn test_missing_size_fails_closed() {
        let page = "pro_free no size anywhere";
        assert_eq!(
            evaluate(&strict_policy(), &tracker(), page),
            Verdict::Reject(RejectReason::SizeMissing)
        );
    }

    #[test]
    fn test_unparsable_size_fails_closed() {
        let page = "pro_free Size: huge<br>";
        assert_eq!(
            evaluate(&strict_policy(), &tracker(), page),
            Verdict::Reject(RejectReason::SizeUnparsable("huge".to_string()))
        );
    }

    #[test]
    fn test_rules_off_accept_anything() {
        let policy = SitePolicy::new("uid=1");
        assert!(evaluate(&policy, &tracker(), "").is_accept());
    }

    #[test]
    fn test_undefined_indicator_skips_rule() {
        let bare = RulePlugin::new("bare.org", "x").unwrap();
        let mut policy = SitePolicy::new("uid=1");
        policy.only_when_free_leech = true;
        policy.only_when_not_hr = true;
        assert!(evaluate(&policy, &bare, "<html/>").is_accept());
    }

    #[test]
    fn test_size_limit_without_size_pattern_rejects() {
        let bare = RulePlugin::new("bare.org", "x").unwrap();
        let mut policy = SitePolicy::new("uid=1");
        policy.max_size_mb = Some(100.0);
        assert_eq!(
            evaluate(&policy, &bare, "Size: 1 MB"),
            Verdict::Reject(RejectReason::SizeMissing)
        );
    }
}
