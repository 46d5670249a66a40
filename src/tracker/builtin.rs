//! Rule plugins for the trackers supported out of the box.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use regex::Captures;

use super::{RegistryError, RulePlugin};

/// Every built-in plugin, in registration order.
pub fn builtin_plugins() -> Result<Vec<RulePlugin>, RegistryError> {
    Ok(vec![chdbits()?, totheglory()?, u2()?])
}

fn chdbits() -> Result<RulePlugin, RegistryError> {
    RulePlugin::new("chdbits.co", r"https?://chdbits\.co/details\.php\?id=(\d+)")?
        .with_free_leech(r"<img.+?Free.+?免费.+?>")?
        .with_size_field(r#"<td valign="top" align="left">([\d.]+\s*[GMK]B)\s*\(.+?bytes\)\s*</td>"#)
}

fn totheglory() -> Result<RulePlugin, RegistryError> {
    Ok(
        RulePlugin::new("totheglory.im", r"rssdd\.php\?par=([a-zA-Z0-9+/=]+)")?
            .with_detail_page_transformer(totheglory_detail_url)
            .with_free_leech(r"/pic/ico_free\.gif")?
            .with_hit_and_run(r"/pic/hit_run\.gif")?
            .with_size_field(r"尺寸.+?>([\d.]+\s*[GMK]B)")?,
    )
}

fn u2() -> Result<RulePlugin, RegistryError> {
    RulePlugin::new("u2.dmhy.org", r"https?://u2\.dmhy\.org/details\.php\?id=(\d+)")?
        .with_free_leech(r"pro_free|pro_free2up|0.00X")?
        .with_size_field(r"<b>大小:</b>[\s\S]+?([\d.]+\s*[GMK]i?B)\s*[\s\S]+?<b>")
}

/// TTG tokens show up both with and without `=` padding.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// TTG download links carry a base64 `par` token whose payload starts with
/// `vvv<torrent id>`; the detail page is derived from that id.
fn totheglory_detail_url(caps: &Captures<'_>) -> Option<String> {
    let token = caps.get(1)?.as_str();
    let decoded = match TOKEN_ENGINE.decode(token) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(token = %token, error = %e, "Undecodable TTG download token");
            return None;
        }
    };
    let payload = String::from_utf8_lossy(&decoded);
    let id = payload.lines().find_map(|line| {
        let rest = line
            .get(..3)
            .filter(|prefix| prefix.eq_ignore_ascii_case("vvv"))
            .and_then(|_| line.get(3..))?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        (!digits.is_empty()).then_some(digits)
    })?;
    Some(format!("https://totheglory.im/details.php?id={id}"))
}
