use std::env;
use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use cutify_contracts::errors::GenerationError;
use cutify_contracts::events::{EventPayload, EventWriter};
use cutify_contracts::mutation::{MutationResult, MutationState};

use crate::fetch::{data_url_from_bytes, image_bytes_from_url, ImageBytes};
use crate::{error_chain_text, non_empty_env, truncate_text};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_STRENGTH: f64 = 0.75;

pub const USER_SAFE_GENERATION_MESSAGE: &str =
    "Unable to create cutified version. Please try again later.";
pub const USER_SAFE_REMIX_MESSAGE: &str =
    "Unable to create new cutified version. Please try again later.";

/// Default prompt for the first cutify pass.
pub const CUTIFY_PROMPT: &str = "\
Transform this character into an ADORABLY CUTE HALLOWEEN creature version.
Keep the base form and recognizable traits, but make the vibe cozy, friendly, and festive:
- Dress it in charming Halloween motifs: tiny witch hats, bat wings, soft ghost sheets, pumpkin accents, candy corn patterns, cute cobwebs, tiny stars.
- Use soft, pastel-forward palettes: warm oranges, lavender purples, mint greens, creamy whites, midnight accents; gentle gradients and plush textures.
- Emphasize round, kawaii shapes, big expressive eyes, gentle smiles, plush surfaces, and soft highlights.
- Add playful magical effects: subtle sparkles, soft glows, floating candy, friendly fireflies, gentle moonlight rim light.
- Keep the background composition similar to the original, just lightly decorated with Halloween ambiance.
Art direction: cute illustration style, high-quality digital painting, soft cinematic lighting, crisp yet soft-edged details. No text, no watermark, no logos. Avoid horror, gore, or anything unsettling.
Output: a single centered composition featuring the full character with the above Halloween-cute enhancements.
";

/// Remix prompt, engineered to diverge from the prior output while
/// keeping the subject recognizable. The remix source is the current
/// mutated image, not the original.
pub const REMIX_PROMPT: &str = "\
Create an ALTERNATIVE CUTE HALLOWEEN version with a completely different aesthetic.
Keep the base form recognizable, but this time go in a DIFFERENT DIRECTION:
- Use a completely different pastel color palette (if the previous was orange/purple, try mint/pink, lavender/cream, or peach/teal).
- Change the Halloween costume style: if the previous had witch vibes, try ghost sprite, pumpkin friend, candy wizard, or bat familiar.
- Add different accessories: a different hat style, new wings, alternative candy decorations, or unique Halloween props.
- Experiment with different soft lighting: warm candlelight glow, cool moonlight shimmer, or sparkly magic aura.
- Vary the background atmosphere: misty forest, cozy pumpkin patch, starry night sky, or soft fog with fireflies.
- Make this version feel like a REMIX or ALTERNATE COSTUME, distinctly different but equally charming and wholesome.
Style: cute illustration, high-quality digital painting, soft cinematic lighting, cozy Halloween vibes. No horror or gore.
";

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub source: ImageBytes,
    pub prompt: String,
    pub strength: f64,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Boundary to the generative-image provider: one source image in, the
/// first complete generated image out.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage>;
}

const TRANSPORT_RETRIES: usize = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(1200);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

pub struct GeminiProvider {
    api_base: String,
    model: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: non_empty_env("CUTIFY_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(&self, request: &GenerateRequest) -> Value {
        let parts = vec![
            json!({
                "inlineData": {
                    "mimeType": request.source.mime_type,
                    "data": BASE64.encode(&request.source.bytes),
                }
            }),
            json!({ "text": request.prompt }),
        ];
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE", "TEXT"],
            },
        })
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        for attempt in 0..=TRANSPORT_RETRIES {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(REQUEST_TIMEOUT)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err =
                        anyhow::Error::new(raw).context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= TRANSPORT_RETRIES {
                        return Err(err);
                    }
                    thread::sleep(RETRY_BACKOFF.saturating_mul(attempt as u32 + 1));
                }
            }
        }

        unreachable!("Gemini transport retry loop should always return a response or error")
    }

    fn extract_first_image(response_payload: &Value) -> Result<GeneratedImage> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let inline = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png")
                    .to_string();
                return Ok(GeneratedImage { bytes, mime_type });
            }
        }

        bail!("Gemini returned no image data")
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint();
        let payload = self.build_payload(request);
        let response = self.post_with_transport_retries(&endpoint, &api_key, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::extract_first_image(&response_payload)
    }
}

/// Offline provider: a deterministic solid-color placeholder derived
/// from the prompt and source bytes, so the whole flow runs and tests
/// without credentials.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let (r, g, b) = color_from_inputs(&request.prompt, &request.source.bytes);
        let mut canvas = RgbImage::new(256, 256);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed encoding dryrun image")?;
        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }
}

fn color_from_inputs(prompt: &str, source: &[u8]) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(source);
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// Drives the mutation state machine against an image provider. Raw
/// provider errors go to the event log; the user only ever sees the
/// fixed safe messages.
pub struct MutationEngine {
    provider: Box<dyn ImageProvider>,
    http: HttpClient,
    events: EventWriter,
}

impl MutationEngine {
    pub fn new(provider: Box<dyn ImageProvider>, events: EventWriter) -> Self {
        Self {
            provider,
            http: HttpClient::new(),
            events,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// First generation or retry from the error state. The outcome lands
    /// in the state machine; the returned flag says whether the result
    /// was applied (false means it was stale or failed).
    pub fn generate(&self, state: &mut MutationState, source_image_url: &str) -> Result<bool> {
        let token = state.begin_generation();
        self.emit_started("generate", source_image_url)?;

        match self.run(source_image_url, CUTIFY_PROMPT) {
            Ok(result) => {
                let applied = state.complete(token, result);
                self.emit_finished("generate", applied)?;
                Ok(applied)
            }
            Err(err) => {
                self.emit_failed("generate", &err)?;
                state.fail(token, USER_SAFE_GENERATION_MESSAGE);
                Ok(false)
            }
        }
    }

    /// Remix from the ready state: the current mutated image is the new
    /// source. A failed remix restores the prior result (handled by the
    /// state machine).
    pub fn remix(&self, state: &mut MutationState) -> Result<bool> {
        let Some((token, source_image_url)) = state.begin_remix() else {
            return Ok(false);
        };
        self.emit_started("remix", &source_image_url)?;

        match self.run(&source_image_url, REMIX_PROMPT) {
            Ok(result) => {
                let applied = state.complete(token, result);
                self.emit_finished("remix", applied)?;
                Ok(applied)
            }
            Err(err) => {
                self.emit_failed("remix", &err)?;
                state.fail(token, USER_SAFE_REMIX_MESSAGE);
                Ok(false)
            }
        }
    }

    fn run(&self, source_image_url: &str, prompt: &str) -> Result<MutationResult> {
        let source = image_bytes_from_url(&self.http, source_image_url)?;
        let generated = self
            .provider
            .generate(&GenerateRequest {
                source,
                prompt: prompt.to_string(),
                strength: DEFAULT_STRENGTH,
            })
            .map_err(|err| GenerationError(error_chain_text(&err, 512)))?;
        Ok(MutationResult {
            mutated_image_url: data_url_from_bytes(&generated.bytes, &generated.mime_type),
            image_generation_service: self.provider.name().to_string(),
        })
    }

    fn emit_started(&self, kind: &str, source: &str) -> Result<()> {
        let mut payload = EventPayload::new();
        payload.insert("kind".to_string(), Value::String(kind.to_string()));
        payload.insert(
            "source".to_string(),
            Value::String(truncate_text(source, 96)),
        );
        payload.insert("provider".to_string(), Value::String(self.provider.name().to_string()));
        payload.insert("strength".to_string(), json!(DEFAULT_STRENGTH));
        self.events.emit("mutation_started", payload)?;
        Ok(())
    }

    fn emit_finished(&self, kind: &str, applied: bool) -> Result<()> {
        let mut payload = EventPayload::new();
        payload.insert("kind".to_string(), Value::String(kind.to_string()));
        payload.insert("applied".to_string(), Value::Bool(applied));
        self.events.emit("mutation_ready", payload)?;
        Ok(())
    }

    fn emit_failed(&self, kind: &str, err: &anyhow::Error) -> Result<()> {
        let mut payload = EventPayload::new();
        payload.insert("kind".to_string(), Value::String(kind.to_string()));
        payload.insert(
            "error".to_string(),
            Value::String(error_chain_text(err, 512)),
        );
        self.events.emit("mutation_failed", payload)?;
        Ok(())
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}
