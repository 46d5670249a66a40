//! Feed documents and outbound fetching.
//!
//! - [`document`] splits an RSS document into channel metadata and raw items,
//!   edits enclosure URLs, and rebuilds the document from a subset of items
//! - [`fetcher`] is the HTTP capability the filter and the proxy use to talk
//!   to trackers
//!
//! # Example
//!
//! ```
//! use leechfeed::feed::parse_feed;
//!
//! let doc = parse_feed(
//!     r#"<rss version="2.0"><channel><title>t</title><item><title>a</title></item></channel></rss>"#,
//! )
//! .unwrap();
//! assert_eq!(doc.items().len(), 1);
//! let empty = doc.render(std::iter::empty());
//! assert!(empty.contains("<title>t</title>"));
//! ```

mod document;
mod fetcher;

pub use document::{parse_feed, FeedDocument, FeedError, FeedItem};
pub use fetcher::{ClientSettings, FetchError, Fetcher, HttpFetcher};
