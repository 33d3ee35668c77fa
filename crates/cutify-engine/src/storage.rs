use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use cutify_contracts::errors::UploadError;

use crate::{error_chain_text, non_empty_env, truncate_text};

/// Boundary to the content-addressed store. Both uploads return an
/// `ipfs://` URI; a failure aborts the mint pipeline outright.
pub trait ContentStorage: Send + Sync {
    fn upload_image(&self, bytes: &[u8], mime_type: &str) -> Result<String, UploadError>;
    fn upload_metadata(&self, metadata: &Value) -> Result<String, UploadError>;
}

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PinataStorage {
    api_base: String,
    jwt: String,
    http: HttpClient,
}

impl PinataStorage {
    /// Reads `PINATA_JWT` (required) and `PINATA_API_BASE` (optional
    /// override) from the environment.
    pub fn from_env() -> Result<Self> {
        let Some(jwt) = non_empty_env("PINATA_JWT") else {
            bail!("PINATA_JWT not set");
        };
        let api_base = env::var("PINATA_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "https://api.pinata.cloud".to_string());
        Ok(Self {
            api_base,
            jwt,
            http: HttpClient::new(),
        })
    }

    fn pin_file(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        let file_name = format!("cutified.{}", extension_for(mime_type));
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name)
            .mime_str(mime_type)
            .context("invalid image mime type")?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/pinning/pinFileToIPFS", self.api_base))
            .bearer_auth(&self.jwt)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .context("Pinata file pin request failed")?;
        Self::ipfs_uri_from_response(response)
    }

    fn pin_json(&self, metadata: &Value) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/pinning/pinJSONToIPFS", self.api_base))
            .bearer_auth(&self.jwt)
            .timeout(UPLOAD_TIMEOUT)
            .json(&json!({ "pinataContent": metadata }))
            .send()
            .context("Pinata JSON pin request failed")?;
        Self::ipfs_uri_from_response(response)
    }

    fn ipfs_uri_from_response(response: reqwest::blocking::Response) -> Result<String> {
        let code = response.status().as_u16();
        let body = response
            .text()
            .context("Pinata response body read failed")?;
        parse_pin_response(code, &body)
    }
}

impl ContentStorage for PinataStorage {
    fn upload_image(&self, bytes: &[u8], mime_type: &str) -> Result<String, UploadError> {
        self.pin_file(bytes, mime_type)
            .map_err(|err| UploadError(error_chain_text(&err, 512)))
    }

    fn upload_metadata(&self, metadata: &Value) -> Result<String, UploadError> {
        self.pin_json(metadata)
            .map_err(|err| UploadError(error_chain_text(&err, 512)))
    }
}

fn parse_pin_response(code: u16, body: &str) -> Result<String> {
    if !(200..300).contains(&code) {
        bail!(
            "Pinata request failed ({code}): {}",
            truncate_text(body, 512)
        );
    }
    let parsed: Value =
        serde_json::from_str(body).context("Pinata returned invalid JSON payload")?;
    let hash = parsed
        .get("IpfsHash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if hash.is_empty() {
        bail!("Pinata response missing IpfsHash");
    }
    Ok(format!("ipfs://{hash}"))
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extension_for, parse_pin_response};

    #[test]
    fn extension_follows_mime_type() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("application/octet-stream"), "png");
    }

    #[test]
    fn success_response_becomes_an_ipfs_uri() -> anyhow::Result<()> {
        let body = serde_json::to_string(&json!({ "IpfsHash": "bafyhash", "PinSize": 12 }))?;
        let uri = parse_pin_response(200, &body)?;
        assert_eq!(uri, "ipfs://bafyhash");
        Ok(())
    }

    #[test]
    fn missing_hash_is_an_error() -> anyhow::Result<()> {
        let body = serde_json::to_string(&json!({ "PinSize": 12 }))?;
        assert!(parse_pin_response(200, &body).is_err());
        Ok(())
    }

    #[test]
    fn non_success_status_carries_the_body() {
        let err = parse_pin_response(401, "Invalid JWT").err().map(|e| e.to_string());
        let message = err.unwrap_or_default();
        assert!(message.contains("401"));
        assert!(message.contains("Invalid JWT"));
    }
}
