// src/validator/model.rs

use serde::{Deserialize, Serialize};

/// Audience can be either a string or an array of strings in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(single) => single == audience,
            Audience::Multiple(all) => all.iter().any(|a| a == audience),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Audience::Single(single) => vec![single],
            Audience::Multiple(all) => all,
        }
    }
}

/// The registered claims the gateway reads from an access token.
#[derive(Debug, Deserialize)]
pub(crate) struct AccessTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub nbf: Option<u64>,
    #[serde(default)]
    pub aud: Option<Audience>,
}
