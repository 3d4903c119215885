use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    domain::{SessionId, SessionParameters},
    error::ProtocolError,
};

/// Client→coordinator frame: the full parameter snapshot, never a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub prompt: String,
    #[serde(deserialize_with = "number_or_string")]
    pub seed: u64,
    #[serde(deserialize_with = "number_or_string")]
    pub guidance_scale: f64,
}

impl ParameterUpdate {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<&SessionParameters> for ParameterUpdate {
    fn from(params: &SessionParameters) -> Self {
        Self {
            prompt: params.prompt.clone(),
            seed: params.seed,
            guidance_scale: params.guidance_scale,
        }
    }
}

/// Coordinator→client lifecycle signal, discriminated by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlMessage {
    Success {
        #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Start {
        #[serde(rename = "userId")]
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Timeout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ControlMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Start { .. } => "start",
            Self::Timeout { .. } => "timeout",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString<T> {
    Number(T),
    Text(String),
}

// Browser form controls submit numeric fields as strings.
fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NumberOrString::<T>::deserialize(deserializer)? {
        NumberOrString::Number(value) => Ok(value),
        NumberOrString::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
