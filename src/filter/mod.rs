//! Eligibility filtering for tracker feeds.
//!
//! - [`size`] turns the size text of a detail page into megabytes
//! - [`cache`] remembers verdicts per detail-page URL
//! - [`scheduler`] bounds concurrent detail-page fetches across all requests
//! - [`eligibility`] judges a detail page against a [`SitePolicy`]
//! - [`pipeline`] ties them together into [`FeedFilter`]

mod cache;
mod eligibility;
mod pipeline;
mod policy;
mod scheduler;
mod size;

pub use cache::{DecisionCache, REJECT_COOLDOWN_MINUTES};
pub use eligibility::{evaluate, RejectReason, Verdict};
pub use pipeline::{proxy_link, FeedFilter, FilterError};
pub use policy::{EnclosureRewrite, SitePolicy};
pub use scheduler::{SchedulerError, VerificationScheduler, DEFAULT_MAX_CONCURRENT_CHECKS};
pub use size::{parse_size, SizeError};
