use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{GenerationBounds, GenerationDefaults};

/// Inbound body for `/generate` and `/generate-async`.
///
/// Everything except `prompt` is optional. A missing prompt deserializes to
/// an empty string and is refused by the safety filter rather than here.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[garde(context(GenerationBounds))]
pub struct GenerateRequest {
    #[serde(default)]
    #[garde(length(max = 4000))]
    pub prompt: String,

    #[garde(length(max = 4000))]
    pub negative_prompt: Option<String>,

    /// Absent or -1 asks for a generated seed.
    #[garde(custom(validate_seed))]
    pub seed: Option<i64>,

    #[garde(custom(validate_steps))]
    pub steps: Option<u32>,

    #[garde(custom(validate_cfg_scale))]
    pub cfg_scale: Option<f64>,

    #[garde(custom(validate_dimension))]
    pub width: Option<u32>,

    #[garde(custom(validate_dimension))]
    pub height: Option<u32>,

    #[garde(length(min = 1, max = 128))]
    pub persona_id: Option<String>,

    #[garde(length(min = 1, max = 128))]
    pub user_id: Option<String>,

    #[garde(custom(validate_request_id))]
    pub request_id: Option<String>,

    #[garde(custom(validate_callback_url))]
    pub callback_url: Option<String>,
}

fn validate_seed(value: &Option<i64>, _bounds: &GenerationBounds) -> garde::Result {
    match value {
        Some(seed) if *seed < -1 => Err(garde::Error::new(
            "seed must be non-negative (or -1 for a random seed)",
        )),
        _ => Ok(()),
    }
}

fn validate_steps(value: &Option<u32>, bounds: &GenerationBounds) -> garde::Result {
    match value {
        Some(steps) if *steps < bounds.min_steps || *steps > bounds.max_steps => {
            Err(garde::Error::new(format!(
                "steps must be between {} and {}",
                bounds.min_steps, bounds.max_steps
            )))
        }
        _ => Ok(()),
    }
}

fn validate_cfg_scale(value: &Option<f64>, bounds: &GenerationBounds) -> garde::Result {
    match value {
        Some(cfg) if !cfg.is_finite() || *cfg < bounds.min_cfg || *cfg > bounds.max_cfg => {
            Err(garde::Error::new(format!(
                "cfg_scale must be between {} and {}",
                bounds.min_cfg, bounds.max_cfg
            )))
        }
        _ => Ok(()),
    }
}

fn validate_dimension(value: &Option<u32>, bounds: &GenerationBounds) -> garde::Result {
    match value {
        Some(px) if *px < bounds.min_dimension || *px > bounds.max_dimension => {
            Err(garde::Error::new(format!(
                "must be between {} and {} pixels",
                bounds.min_dimension, bounds.max_dimension
            )))
        }
        Some(px) if px % 8 != 0 => Err(garde::Error::new("must be a multiple of 8")),
        _ => Ok(()),
    }
}

fn validate_request_id(value: &Option<String>, _bounds: &GenerationBounds) -> garde::Result {
    let Some(id) = value else {
        return Ok(());
    };
    if id.is_empty() || id.len() > 128 {
        return Err(garde::Error::new("length must be between 1 and 128"));
    }
    let valid = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !valid {
        return Err(garde::Error::new(
            "may only contain ASCII letters, digits, '-', '_', '.' and ':'",
        ));
    }
    Ok(())
}

fn validate_callback_url(value: &Option<String>, _bounds: &GenerationBounds) -> garde::Result {
    let Some(raw) = value else {
        return Ok(());
    };
    let url = reqwest::Url::parse(raw).map_err(|e| garde::Error::new(format!("not a URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(garde::Error::new(format!("unsupported scheme '{other}'"))),
    }
}

/// Resolved numeric parameters handed to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub seed: u64,
    pub steps: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
}

/// A validated request with defaults applied. Never mutated after admission.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub request_id: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub params: GenerationParams,
    pub persona_id: Option<String>,
    pub user_id: Option<String>,
    pub callback_url: Option<String>,
}

impl GenerateRequest {
    /// Validate against the configured bounds and resolve defaults.
    pub fn into_generation(
        self,
        defaults: &GenerationDefaults,
        bounds: &GenerationBounds,
    ) -> Result<GenerationRequest, garde::Report> {
        self.validate_with(bounds)?;

        let seed = match self.seed {
            Some(seed) if seed >= 0 => seed as u64,
            _ => random_seed(),
        };

        Ok(GenerationRequest {
            request_id: self.request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            params: GenerationParams {
                seed,
                steps: self.steps.unwrap_or(defaults.steps),
                cfg_scale: self.cfg_scale.unwrap_or(defaults.cfg_scale),
                width: self.width.unwrap_or(defaults.width),
                height: self.height.unwrap_or(defaults.height),
            },
            persona_id: self.persona_id,
            user_id: self.user_id,
            callback_url: self.callback_url,
        })
    }
}

/// 32-bit seed derived from a v4 UUID.
fn random_seed() -> u64 {
    (Uuid::new_v4().as_u128() % (1u128 << 32)) as u64
}

/// What the backend produced for one render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderResult {
    /// Storage reference (file name under the output directory)
    pub image_ref: String,
    pub image_url: String,
    /// First 16 hex chars of the SHA-256 of the image bytes
    pub image_hash: String,
    pub seed_used: u64,
    pub latency_ms: u64,
}

/// Response for the synchronous generate endpoint.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub request_id: String,
    pub image_url: String,
    pub image_hash: String,
    pub seed_used: u64,
}

/// Acknowledgment for the async generate endpoint.
#[derive(Debug, Serialize)]
pub struct AsyncQueuedResponse {
    pub status: String,
    pub request_id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> GenerationDefaults {
        GenerationDefaults {
            steps: 32,
            cfg_scale: 6.0,
            width: 1024,
            height: 1024,
        }
    }

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied_and_seed_generated() {
        let resolved = request("portrait")
            .into_generation(&defaults(), &GenerationBounds::default())
            .unwrap();
        assert_eq!(resolved.params.steps, 32);
        assert_eq!(resolved.params.width, 1024);
        assert!(resolved.params.seed < (1u64 << 32));
        assert!(!resolved.request_id.is_empty());
    }

    #[test]
    fn test_explicit_seed_kept_including_zero() {
        let mut req = request("portrait");
        req.seed = Some(0);
        let resolved = req
            .into_generation(&defaults(), &GenerationBounds::default())
            .unwrap();
        assert_eq!(resolved.params.seed, 0);

        let mut req = request("portrait");
        req.seed = Some(100_042);
        req.request_id = Some("req_123".to_string());
        let resolved = req
            .into_generation(&defaults(), &GenerationBounds::default())
            .unwrap();
        assert_eq!(resolved.params.seed, 100_042);
        assert_eq!(resolved.request_id, "req_123");
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let bounds = GenerationBounds::default();

        let mut req = request("portrait");
        req.steps = Some(500);
        assert!(req.into_generation(&defaults(), &bounds).is_err());

        let mut req = request("portrait");
        req.width = Some(1000); // not a multiple of 8
        assert!(req.into_generation(&defaults(), &bounds).is_err());

        let mut req = request("portrait");
        req.cfg_scale = Some(f64::NAN);
        assert!(req.into_generation(&defaults(), &bounds).is_err());

        let mut req = request("portrait");
        req.seed = Some(-7);
        assert!(req.into_generation(&defaults(), &bounds).is_err());
    }

    #[test]
    fn test_callback_url_and_request_id_shape() {
        let bounds = GenerationBounds::default();

        let mut req = request("portrait");
        req.callback_url = Some("ftp://example.com/hook".to_string());
        assert!(req.into_generation(&defaults(), &bounds).is_err());

        let mut req = request("portrait");
        req.request_id = Some("../etc/passwd".to_string());
        assert!(req.into_generation(&defaults(), &bounds).is_err());

        let mut req = request("portrait");
        req.callback_url = Some("https://app.example.com/hooks/image".to_string());
        req.seed = Some(-1);
        assert!(req.into_generation(&defaults(), &bounds).is_ok());
    }
}
