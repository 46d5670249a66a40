use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::ops::Range;
use thiserror::Error;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("XML parse error: {0}")]
    Xml(String),
    #[error("Feed has no <channel> element")]
    MissingChannel,
    #[error("Feed ended before all elements were closed")]
    Truncated,
    #[error("Failed to write XML: {0}")]
    Write(String),
}

/// An RSS document split into the pieces the filter needs.
///
/// Channel-level elements and items are kept as the exact source markup, so
/// elements this crate knows nothing about (namespaced extensions, CDATA,
/// comments inside items) pass through untouched.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    root_start: String,
    root_name: String,
    channel_start: String,
    channel_name: String,
    metadata: Vec<String>,
    items: Vec<FeedItem>,
}

/// One `<item>` of the source feed, as raw markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    markup: String,
}

impl FeedDocument {
    /// Channel children other than `<item>`, in source order.
    pub fn metadata(&self) -> &[String] {
        &self.metadata
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    /// Serializes the document with `items` in place of the source items.
    ///
    /// The root and channel start tags are reproduced verbatim (namespace
    /// declarations included), followed by the channel metadata and then
    /// the given items in iteration order.
    pub fn render<'a, I>(&self, items: I) -> String
    where
        I: IntoIterator<Item = &'a FeedItem>,
    {
        let mut out = String::with_capacity(
            XML_DECLARATION.len()
                + self.root_start.len()
                + self.channel_start.len()
                + self.metadata.iter().map(String::len).sum::<usize>(),
        );
        out.push_str(XML_DECLARATION);
        out.push_str(&self.root_start);
        out.push_str(&self.channel_start);
        for element in &self.metadata {
            out.push_str(element);
        }
        for item in items {
            out.push_str(&item.markup);
        }
        out.push_str("</");
        out.push_str(&self.channel_name);
        out.push_str("></");
        out.push_str(&self.root_name);
        out.push('>');
        out
    }
}

/// Splits an RSS document into root, channel metadata and items.
///
/// Only the first `<channel>` is considered. Whitespace between channel
/// children is not preserved.
pub fn parse_feed(source: &str) -> Result<FeedDocument, FeedError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);

    let mut root: Option<(String, String)> = None;
    let mut channel: Option<(String, String)> = None;
    let mut in_channel = false;
    let mut metadata = Vec::new();
    let mut items = Vec::new();
    // Start offset of the channel child currently being read, and whether it is an item.
    let mut child: Option<(usize, bool)> = None;
    let mut depth: usize = 0;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| FeedError::Xml(e.to_string()))?;
        let after = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                depth += 1;
                match depth {
                    1 => root = Some((source[before..after].to_string(), element_name(&e))),
                    2 if channel.is_none() && e.local_name().as_ref() == b"channel" => {
                        channel = Some((source[before..after].to_string(), element_name(&e)));
                        in_channel = true;
                    }
                    3 if in_channel => {
                        child = Some((before, e.local_name().as_ref() == b"item"));
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match depth + 1 {
                2 if channel.is_none() && e.local_name().as_ref() == b"channel" => {
                    let name = element_name(&e);
                    channel = Some((format!("<{name}>"), name));
                }
                3 if in_channel => {
                    let raw = source[before..after].to_string();
                    if e.local_name().as_ref() == b"item" {
                        items.push(FeedItem { markup: raw });
                    } else {
                        metadata.push(raw);
                    }
                }
                _ => {}
            },
            Event::End(_) => {
                match depth {
                    3 if in_channel => {
                        if let Some((start, is_item)) = child.take() {
                            let raw = source[start..after].to_string();
                            if is_item {
                                items.push(FeedItem { markup: raw });
                            } else {
                                metadata.push(raw);
                            }
                        }
                    }
                    2 if in_channel => in_channel = false,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(FeedError::Truncated);
    }

    let (root_start, root_name) = root.ok_or(FeedError::MissingChannel)?;
    let (channel_start, channel_name) = channel.ok_or(FeedError::MissingChannel)?;

    Ok(FeedDocument {
        root_start,
        root_name,
        channel_start,
        channel_name,
        metadata,
        items,
    })
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

struct EnclosureTag<'a> {
    span: Range<usize>,
    start: BytesStart<'a>,
    empty: bool,
    url: Option<String>,
}

fn find_enclosure(markup: &str) -> Result<Option<EnclosureTag<'_>>, FeedError> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(false);

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| FeedError::Xml(e.to_string()))?;
        let after = reader.buffer_position() as usize;

        let (start, empty) = match event {
            Event::Start(e) if e.local_name().as_ref() == b"enclosure" => (e, false),
            Event::Empty(e) if e.local_name().as_ref() == b"enclosure" => (e, true),
            Event::Eof => return Ok(None),
            _ => continue,
        };

        let mut url = None;
        for attr_result in start.attributes() {
            let attr = match attr_result {
                Ok(attr) => attr,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed enclosure attribute");
                    continue;
                }
            };
            if attr.key.as_ref() == b"url" {
                let value = attr
                    .decode_and_unescape_value(reader.decoder())
                    .map_err(|e| FeedError::Xml(e.to_string()))?;
                url = Some(value.into_owned());
            }
        }

        return Ok(Some(EnclosureTag {
            span: before..after,
            start,
            empty,
            url,
        }));
    }
}

impl FeedItem {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
        }
    }

    /// The item exactly as it will be written out.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Download URL of the first `<enclosure>`, unescaped.
    pub fn enclosure_url(&self) -> Option<String> {
        match find_enclosure(&self.markup) {
            Ok(tag) => tag.and_then(|t| t.url),
            Err(e) => {
                tracing::debug!(error = %e, "Unreadable enclosure in feed item");
                None
            }
        }
    }

    /// Replaces the `url` attribute of the first `<enclosure>`.
    ///
    /// Other attributes keep their source spelling. Returns `false` when the
    /// item has no enclosure.
    pub fn set_enclosure_url(&mut self, url: &str) -> Result<bool, FeedError> {
        let (span, replacement) = {
            let Some(tag) = find_enclosure(&self.markup)? else {
                return Ok(false);
            };

            let mut rebuilt = BytesStart::new(element_name(&tag.start));
            let mut replaced = false;
            for attr_result in tag.start.attributes() {
                let attr = attr_result.map_err(|e| FeedError::Xml(e.to_string()))?;
                if attr.key.as_ref() == b"url" && !replaced {
                    rebuilt.push_attribute(("url", url));
                    replaced = true;
                } else {
                    rebuilt.push_attribute(attr);
                }
            }
            if !replaced {
                rebuilt.push_attribute(("url", url));
            }

            let event = if tag.empty {
                Event::Empty(rebuilt)
            } else {
                Event::Start(rebuilt)
            };
            let mut writer = Writer::new(Vec::new());
            writer
                .write_event(event)
                .map_err(|e| FeedError::Write(e.to_string()))?;
            let replacement = String::from_utf8(writer.into_inner())
                .map_err(|e| FeedError::Write(e.to_string()))?;
            (tag.span, replacement)
        };

        self.markup.replace_range(span, &replacement);
        Ok(true)
    }
}
