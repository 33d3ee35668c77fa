use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;

use crate::truncate_text;

const IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Materialize a displayable image reference into bytes. Handles both
/// embedded data URIs and remote HTTP(S)/IPFS URIs, which is exactly
/// the pair the mutation result can hold.
pub fn image_bytes_from_url(http: &HttpClient, url: &str) -> Result<ImageBytes> {
    if url.starts_with("data:") {
        let Some((mime_type, encoding, payload)) = parse_data_url(url) else {
            bail!("malformed data URI");
        };
        let bytes = match encoding {
            DataEncoding::Base64 => BASE64
                .decode(payload.as_bytes())
                .context("data URI base64 decode failed")?,
            DataEncoding::Percent => percent_decode(&payload),
        };
        return Ok(ImageBytes { bytes, mime_type });
    }

    let fetch_url = http_url_for(url);
    let response = http
        .get(&fetch_url)
        .send()
        .with_context(|| format!("failed downloading image ({fetch_url})"))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "image download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "image/png".to_string());
    let bytes = response
        .bytes()
        .context("failed reading image bytes")?
        .to_vec();
    Ok(ImageBytes { bytes, mime_type })
}

pub fn data_url_from_bytes(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// Rewrite `ipfs://` references through a public gateway; everything
/// else passes through untouched.
pub fn http_url_for(uri: &str) -> String {
    match uri.strip_prefix("ipfs://") {
        Some(path) => format!("{IPFS_GATEWAY}{}", path.trim_start_matches('/')),
        None => uri.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataEncoding {
    Base64,
    Percent,
}

fn parse_data_url(url: &str) -> Option<(String, DataEncoding, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let (mime_type, encoding) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, DataEncoding::Base64),
        None => (header, DataEncoding::Percent),
    };
    let mime_type = mime_type.trim();
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        mime_type.to_string()
    };
    Some((mime_type, encoding, payload.to_string()))
}

fn percent_decode(payload: &str) -> Vec<u8> {
    let raw = payload.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut index = 0;
    while index < raw.len() {
        if raw[index] == b'%' && index + 2 < raw.len() {
            let pair = std::str::from_utf8(&raw[index + 1..index + 3]).unwrap_or("");
            if let Ok(byte) = u8::from_str_radix(pair, 16) {
                bytes.push(byte);
                index += 3;
                continue;
            }
        }
        bytes.push(raw[index]);
        index += 1;
    }
    bytes
}
