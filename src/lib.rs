//! leechfeed: an RSS filtering proxy for private trackers.
//!
//! A feed reader asks for `/<percent-encoded feed URL>`; leechfeed fetches the
//! feed, checks every item's detail page against the site's policy
//! (freeleech, hit-and-run, size ceiling) and returns the feed with only the
//! eligible items. Enclosures of kept items can be downloaded through
//! `/proxy`, which adds the site's cookie on the caller's behalf.

pub mod config;
pub mod feed;
pub mod filter;
pub mod proxy;
pub mod server;
pub mod tracker;
pub mod util;
