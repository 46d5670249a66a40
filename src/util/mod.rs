//! Utility functions shared by the HTTP layer and the filtering pipeline.
//!
//! - **Feed URL parsing**: decode the inbound request path into a feed URL and
//!   derive the site domain used to look up rule plugins and site policies

mod url_validator;

pub use url_validator::{decode_request_path, validate_feed_url, FeedUrl, FeedUrlError};
