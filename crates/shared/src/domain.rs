use std::{fmt, ops::RangeInclusive};

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

pub const DEFAULT_SEED: u64 = 2_159_232;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 8.0;
pub const GUIDANCE_SCALE_RANGE: RangeInclusive<f64> = 1.0..=30.0;

/// Opaque identifier the coordinator assigns when it admits a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live generation parameters. The client is the source of truth for these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub prompt: String,
    pub seed: u64,
    pub guidance_scale: f64,
}

impl SessionParameters {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            seed: DEFAULT_SEED,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
        }
    }

    pub fn apply(&mut self, edit: ParameterEdit) -> Result<(), ProtocolError> {
        match edit {
            ParameterEdit::Prompt(prompt) => self.prompt = prompt,
            ParameterEdit::Seed(seed) => self.seed = seed,
            ParameterEdit::GuidanceScale(value) => {
                self.guidance_scale = clamp_guidance_scale(value)?;
            }
        }
        Ok(())
    }

    /// Human-readable one-line description, used as image metadata on export.
    pub fn describe(&self) -> String {
        format!(
            "prompt: {}, seed: {}, guidance_scale: {}",
            self.prompt, self.seed, self.guidance_scale
        )
    }
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// A single raw edit coming from one of the parameter controls.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterEdit {
    Prompt(String),
    Seed(u64),
    GuidanceScale(f64),
}

pub fn clamp_guidance_scale(value: f64) -> Result<f64, ProtocolError> {
    if !value.is_finite() {
        return Err(ProtocolError::InvalidGuidanceScale(value));
    }
    Ok(value.clamp(*GUIDANCE_SCALE_RANGE.start(), *GUIDANCE_SCALE_RANGE.end()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    #[serde(rename = "queue_size")]
    pub queue_size: u32,
}
