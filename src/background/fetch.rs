//! Resolving background image URLs to bytes.
//!
//! Remote images are fetched with the `curl` executable, the same way remote
//! media elsewhere in this crate is delegated to command-line tools.

use crate::error::LoadError;
use base64::Engine;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;
use url::Url;

/// Origin sent with remote requests, as an anonymous cross-origin load would.
const REQUEST_ORIGIN: &str = "null";

/// Upper bound for a single remote fetch.
const FETCH_TIMEOUT_SECS: u32 = 30;

/// Raw image bytes plus whether the source allows reading its pixels back.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub media_type: Option<String>,
    pub cross_origin_readable: bool,
}

/// Where an image URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocation {
    Remote(Url),
    Data(String),
    File(PathBuf),
}

impl ImageLocation {
    /// Classifies an absolute URL, data URL, `file://` URL or plain path.
    pub fn parse(input: &str) -> Result<Self, LoadError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LoadError::InvalidUrl(input.to_string()));
        }

        match Url::parse(trimmed) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(ImageLocation::Remote(url)),
                "data" => Ok(ImageLocation::Data(trimmed.to_string())),
                "file" => url
                    .to_file_path()
                    .map(ImageLocation::File)
                    .map_err(|_| LoadError::InvalidUrl(input.to_string())),
                // Windows drive letters parse as one-letter schemes
                scheme if scheme.len() == 1 => Ok(ImageLocation::File(PathBuf::from(trimmed))),
                scheme => Err(LoadError::UnsupportedScheme(scheme.to_string())),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(ImageLocation::File(PathBuf::from(trimmed))),
            Err(e) => Err(LoadError::InvalidUrl(format!("{input}: {e}"))),
        }
    }
}

/// Fetches the bytes behind an image URL.
pub fn fetch(input: &str) -> Result<Fetched, LoadError> {
    match ImageLocation::parse(input)? {
        ImageLocation::Remote(url) => fetch_remote(&url),
        ImageLocation::Data(data_url) => {
            let (media_type, bytes) = decode_data_url(&data_url)?;
            Ok(Fetched {
                bytes,
                media_type: Some(media_type),
                cross_origin_readable: true,
            })
        }
        ImageLocation::File(path) => {
            debug!("Reading background image from {:?}", path);
            Ok(Fetched {
                bytes: std::fs::read(&path)?,
                media_type: None,
                cross_origin_readable: true,
            })
        }
    }
}

/// Splits a `data:` URL into its media type and decoded payload.
pub fn decode_data_url(input: &str) -> Result<(String, Vec<u8>), LoadError> {
    let rest = input
        .strip_prefix("data:")
        .ok_or_else(|| LoadError::InvalidUrl(input.to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| LoadError::InvalidUrl("data URL without ','".to_string()))?;

    let mut params = meta.split(';');
    let media_type = match params.next() {
        Some(t) if !t.is_empty() => t.to_ascii_lowercase(),
        _ => "text/plain".to_string(),
    };
    let is_base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let compact: Vec<u8> = percent_decode_str(&compact).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| LoadError::Decode(format!("invalid base64 payload: {e}")))?
    } else {
        percent_decode_str(payload).collect()
    };
    Ok((media_type, bytes))
}

fn fetch_remote(url: &Url) -> Result<Fetched, LoadError> {
    debug!("Fetching background image from {}", url);
    let output = Command::new("curl")
        .args([
            "--silent",
            "--show-error",
            "--location",
            "--fail",
            "--include",
            "--max-time",
            &FETCH_TIMEOUT_SECS.to_string(),
            "--header",
            &format!("Origin: {REQUEST_ORIGIN}"),
            url.as_str(),
        ])
        .output()
        .map_err(|e| LoadError::Fetch(format!("failed to run curl: {e}")))?;

    if !output.status.success() {
        return Err(LoadError::Fetch(format!(
            "{}: {}",
            url,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let (headers, body) = split_http_response(&output.stdout)?;
    let readable = cross_origin_readable(&headers);
    if !readable {
        debug!(
            "{} does not allow cross-origin reads (Access-Control-Allow-Origin: {:?})",
            url,
            header_value(&headers, "access-control-allow-origin")
        );
    }

    Ok(Fetched {
        bytes: body.to_vec(),
        media_type: header_value(&headers, "content-type").map(|t| t.to_ascii_lowercase()),
        cross_origin_readable: readable,
    })
}

/// Splits `curl --include` output into the final response's header lines and body.
/// Redirects and `100 Continue` produce several header blocks; the last one wins.
fn split_http_response(raw: &[u8]) -> Result<(Vec<String>, &[u8]), LoadError> {
    let mut rest = raw;
    let mut headers = Vec::new();
    while rest.starts_with(b"HTTP/") {
        let end = find_subslice(rest, b"\r\n\r\n")
            .map(|i| (i, 4))
            .or_else(|| find_subslice(rest, b"\n\n").map(|i| (i, 2)))
            .ok_or_else(|| LoadError::Fetch("truncated HTTP response headers".to_string()))?;
        let block = String::from_utf8_lossy(&rest[..end.0]);
        headers = block.lines().skip(1).map(str::to_string).collect();
        rest = &rest[end.0 + end.1..];
    }
    Ok((headers, rest))
}

/// Value of the first header named `name`, compared case-insensitively.
fn header_value<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Whether a response lets an anonymous (`Origin: null`) request read its pixels.
fn cross_origin_readable(headers: &[String]) -> bool {
    matches!(
        header_value(headers, "access-control-allow-origin"),
        Some("*") | Some(REQUEST_ORIGIN)
    )
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
