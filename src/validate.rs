//! Syntactic checks shared by every image grammar.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{ImageError, ParseError};

/// Literal scheme prefix of platform image URIs.
pub const SCHEME: &str = "image:";

pub const DEFAULT_TAG: &str = "latest";

/// Reports whether `raw` carries an explicit tag.
///
/// A single leading `image:` is stripped first so the scheme separator is not
/// counted as a tag separator. Only the text after the last `/` is inspected,
/// which keeps `host:port/...` prefixes out of the way.
pub fn has_tag(raw: &str) -> Result<bool, ParseError> {
    let image = raw.strip_prefix(SCHEME).unwrap_or(raw);
    let last = last_segment(image);
    let colons = last.matches(':').count();
    if colons == 0 {
        return Ok(false);
    }
    if last.ends_with(':') {
        return Err(ParseError::EmptyTag);
    }
    if last.starts_with(':') {
        return Err(ParseError::EmptyName);
    }
    if colons > 1 {
        return Err(ParseError::TooManyTags);
    }
    Ok(true)
}

/// Splits `raw` on the last `:` that follows the last `/`.
pub fn split_tag(raw: &str) -> Result<(&str, Option<&str>), ParseError> {
    let start = raw.rfind('/').map_or(0, |i| i + 1);
    let Some(offset) = raw[start..].rfind(':') else {
        return Ok((raw, None));
    };
    let colon = start + offset;
    let (name, tag) = (&raw[..colon], &raw[colon + 1..]);

    validate_tag(tag)?;
    if name[start..].contains(':') {
        return Err(ParseError::TooManyTags);
    }
    if name.is_empty() || name.ends_with('/') {
        return Err(ParseError::EmptyName);
    }
    Ok((name, Some(tag)))
}

/// Like [`split_tag`], falling back to `default_tag` when no tag is present.
pub fn split_name_and_tag(raw: &str, default_tag: &str) -> Result<(String, String), ParseError> {
    let (name, tag) = split_tag(raw)?;
    Ok((name.to_string(), tag.unwrap_or(default_tag).to_string()))
}

pub fn validate_tag(tag: &str) -> Result<(), ParseError> {
    if tag.is_empty() {
        return Err(ParseError::EmptyTag);
    }
    if tag.contains('/') {
        return Err(ParseError::InvalidTag);
    }
    Ok(())
}

/// Checks applied to every raw input before grammar dispatch.
pub fn validate_image_string(raw: &str) -> Result<(), ParseError> {
    if raw.is_empty() {
        return Err(ParseError::EmptyImageName);
    }
    if raw.starts_with('-') {
        return Err(ParseError::StartsWithDash);
    }
    // The URI parser drops tabs and newlines silently.
    if raw.chars().any(char::is_control) {
        return Err(ParseError::ControlCharacter);
    }
    // `image:latest` reads equally well as a local `image` tagged `latest`
    // and as the remote image `latest`.
    if raw == "image:latest" {
        return Err(ParseError::Ambiguous);
    }
    Ok(())
}

pub fn is_dot_segment(segment: &str) -> bool {
    matches!(segment, "." | "..")
}

/// Rejects `.` and `..` segments of a raw URI, percent-encoded ones included,
/// before URI resolution folds them away.
pub fn check_dot_segments(raw: &str) -> Result<(), ParseError> {
    let path = raw.split(['?', '#']).next().unwrap_or(raw);
    let dotted = path
        .split('/')
        .any(|segment| is_dot_segment(&percent_decode_str(segment).decode_utf8_lossy()));
    if dotted {
        return Err(ParseError::DotSegment);
    }
    Ok(())
}

/// Percent-decodes one URI component. `what` names the component in errors.
pub fn decode_component<'a>(
    raw: &'a str,
    what: &'static str,
) -> Result<Cow<'a, str>, ParseError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| ParseError::InvalidEncoding(what))
}

/// Extracts `host[:port]` from a registry base URL.
///
/// Scheme-less strings, bare host names and path-only URLs all fail, so a
/// broken registry map is reported when the parser is built.
pub fn registry_authority(registry_url: &str) -> Result<String, ImageError> {
    let empty = || ImageError::EmptyRegistryHost(registry_url.to_string());
    let url = Url::parse(registry_url).map_err(|_| empty())?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(empty)?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn last_segment(image: &str) -> &str {
    image.rsplit('/').next().unwrap_or(image)
}
