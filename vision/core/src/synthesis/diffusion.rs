//! Stable Diffusion HTTP Backend
//!
//! Talks to a server exposing the Stable-Diffusion-WebUI API:
//!
//! - `POST /sdapi/v1/img2img` - chart-guided run, the control visual is the
//!   init image and `conditioning_strength` is the denoising strength
//! - `POST /sdapi/v1/txt2img` - free run from the prompt alone
//!
//! Each call picks a guided run with probability `guided_probability` and a
//! fresh random 32-bit seed. Images travel as base64-encoded PNG.

use std::io::Cursor;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::config::SynthesisConfig;
use crate::pipeline::{ImageSynthesizer, Prompt, Synthesized};

/// Which endpoint a call uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynthesisMode {
    /// img2img from the control visual
    Guided,
    /// txt2img from the prompt only
    Unguided,
}

impl SynthesisMode {
    fn endpoint(self) -> &'static str {
        match self {
            Self::Guided => "/sdapi/v1/img2img",
            Self::Unguided => "/sdapi/v1/txt2img",
        }
    }
}

impl std::fmt::Display for SynthesisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guided => write!(f, "guided"),
            Self::Unguided => write!(f, "unguided"),
        }
    }
}

/// Stable-Diffusion-WebUI client
#[derive(Debug)]
pub struct DiffusionHttpSynthesizer {
    config: SynthesisConfig,
    http_client: reqwest::Client,
    rng: Mutex<StdRng>,
}

impl DiffusionHttpSynthesizer {
    /// Create a client for the configured server
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SynthesisConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Use a fixed seed for mode and seed selection
    #[must_use]
    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Settings
    #[must_use]
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Pick the mode and seed for the next call
    fn roll(&self) -> (SynthesisMode, u32) {
        let mut rng = self.rng.lock();
        let guided = rng.gen_bool(self.config.guided_probability.clamp(0.0, 1.0));
        let seed = rng.gen::<u32>();
        let mode = if guided {
            SynthesisMode::Guided
        } else {
            SynthesisMode::Unguided
        };
        (mode, seed)
    }

    fn request_body(
        &self,
        mode: SynthesisMode,
        seed: u32,
        prompt: &Prompt,
        (width, height): (u32, u32),
        init_image: Option<String>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "prompt": prompt.text,
            "negative_prompt": prompt.negative,
            "steps": self.config.steps,
            "cfg_scale": self.config.guidance_scale,
            "width": width,
            "height": height,
            "seed": seed,
            "batch_size": 1,
        });
        if mode == SynthesisMode::Guided {
            body["init_images"] = serde_json::json!([init_image.unwrap_or_default()]);
            body["denoising_strength"] = serde_json::json!(self.config.conditioning_strength);
        }
        body
    }
}

#[async_trait]
impl ImageSynthesizer for DiffusionHttpSynthesizer {
    fn name(&self) -> &'static str {
        "stable-diffusion-webui"
    }

    async fn synthesize(&self, visual: &RgbImage, prompt: &Prompt) -> anyhow::Result<Synthesized> {
        let (mode, seed) = self.roll();
        let size = visual.dimensions();

        let init_image = match mode {
            SynthesisMode::Guided => {
                let visual = visual.clone();
                Some(tokio::task::spawn_blocking(move || encode_png_base64(&visual)).await??)
            }
            SynthesisMode::Unguided => None,
        };

        tracing::info!(%mode, seed, steps = self.config.steps, "Requesting image synthesis");

        let url = format!("{}{}", self.config.base_url(), mode.endpoint());
        let response = self
            .http_client
            .post(&url)
            .json(&self.request_body(mode, seed, prompt, size, init_image))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Synthesis server returned {status}: {body}");
        }

        let reply: SynthesisReply = response.json().await?;
        let used_seed = reply.reported_seed().unwrap_or(u64::from(seed));
        let encoded = reply
            .images
            .into_iter()
            .next()
            .context("Synthesis server returned no images")?;

        let image = tokio::task::spawn_blocking(move || decode_base64_image(&encoded)).await??;
        tracing::debug!(
            seed = used_seed,
            width = image.width(),
            height = image.height(),
            "Synthesis finished"
        );

        Ok(Synthesized {
            image,
            seed: used_seed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SynthesisReply {
    #[serde(default)]
    images: Vec<String>,
    /// JSON document serialised as a string
    #[serde(default)]
    info: Option<String>,
}

impl SynthesisReply {
    fn reported_seed(&self) -> Option<u64> {
        let info: serde_json::Value = serde_json::from_str(self.info.as_deref()?).ok()?;
        info.get("seed").and_then(serde_json::Value::as_u64)
    }
}

fn encode_png_base64(image: &RgbImage) -> anyhow::Result<String> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .context("Failed to encode init image")?;
    Ok(BASE64.encode(cursor.into_inner()))
}

fn decode_base64_image(encoded: &str) -> anyhow::Result<RgbImage> {
    // Some servers prefix a data URL header
    let payload = encoded
        .split_once(',')
        .filter(|(head, _)| head.starts_with("data:"))
        .map_or(encoded, |(_, data)| data);
    let bytes = BASE64
        .decode(payload.trim())
        .context("Synthesis image is not valid base64")?;
    let image = image::load_from_memory(&bytes).context("Synthesis image could not be decoded")?;
    Ok(image.to_rgb8())
}
