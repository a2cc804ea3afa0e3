// src/generator/mod.rs

use crate::error::NilaGatewayError;
use crate::identity::Identity;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{pkcs8::DecodePrivateKey, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Defines the source for the signing key of minted upstream tokens.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "value")]
#[serde(rename_all = "snake_case")]
pub enum SigningKeyConfig {
    /// A shared secret for symmetric algorithms (e.g., HS256).
    SharedSecret(String),
    /// Path to a PEM-encoded (PKCS#8) RSA private key file.
    RsaPemFile(PathBuf),
    /// A PEM-encoded (PKCS#8) RSA private key given inline.
    RsaPem(String),
}

fn default_token_ttl_seconds() -> u64 {
    60
}

/// Configuration for the tokens the gateway mints for the upstream service.
#[derive(Deserialize, Clone, Debug)]
pub struct GeneratorConfig {
    /// The gateway's own identity, placed in the `iss` claim.
    pub issuer: String,
    /// Optional `aud` claim naming the upstream service.
    #[serde(default)]
    pub audience: Option<String>,
    /// The algorithm to use for signing the token.
    pub algorithm: Algorithm,
    /// The lifetime of a minted token, in seconds. Defaults to 60.
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// The key material used for signing tokens.
    pub signing_key: SigningKeyConfig,
}

/// Claims of a token minted for the upstream service.
#[derive(Debug, Serialize)]
struct UpstreamClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<&'a str>,
    iat: u64,
    exp: u64,
    jti: String,
    groups: &'a [String],
    staff: bool,
}

/// Mints short-lived, gateway-signed assertions of a verified identity.
#[derive(Clone)]
pub struct TokenMinter {
    config: GeneratorConfig,
    encoding_key: EncodingKey,
    // Present for asymmetric keys only.
    public_jwk: Option<serde_json::Value>,
}

impl std::fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMinter")
            .field("issuer", &self.config.issuer)
            .field("algorithm", &self.config.algorithm)
            .field("kid", &self.kid())
            .finish()
    }
}

fn invalid_key(detail: String) -> NilaGatewayError {
    NilaGatewayError::InvalidConfiguration(format!("signing key: {detail}"))
}

impl TokenMinter {
    /// Creates a new `TokenMinter`, loading and checking the signing key.
    pub fn new(config: GeneratorConfig) -> Result<Self, NilaGatewayError> {
        if config.issuer.trim().is_empty() {
            return Err(NilaGatewayError::InvalidConfiguration("minted token issuer is empty".to_string()));
        }
        if config.token_ttl_seconds == 0 {
            return Err(NilaGatewayError::InvalidConfiguration(
                "minted token TTL must be positive".to_string(),
            ));
        }

        let (encoding_key, public_jwk) = match &config.signing_key {
            SigningKeyConfig::SharedSecret(secret) => {
                if !matches!(config.algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
                    return Err(invalid_key(format!(
                        "a shared secret cannot sign {:?} tokens",
                        config.algorithm
                    )));
                }
                if secret.is_empty() {
                    return Err(invalid_key("the shared secret is empty".to_string()));
                }
                (EncodingKey::from_secret(secret.as_bytes()), None)
            }
            SigningKeyConfig::RsaPemFile(path) => {
                let pem = std::fs::read_to_string(path)
                    .map_err(|e| invalid_key(format!("failed to read {}: {e}", path.display())))?;
                Self::rsa_keys(&pem, config.algorithm)?
            }
            SigningKeyConfig::RsaPem(pem) => Self::rsa_keys(pem, config.algorithm)?,
        };

        Ok(Self {
            config,
            encoding_key,
            public_jwk,
        })
    }

    fn rsa_keys(pem: &str, algorithm: Algorithm) -> Result<(EncodingKey, Option<serde_json::Value>), NilaGatewayError> {
        if !matches!(
            algorithm,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512
        ) {
            return Err(invalid_key(format!("an RSA key cannot sign {algorithm:?} tokens")));
        }

        let private_key =
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| invalid_key(format!("not a PKCS#8 RSA key: {e}")))?;
        // jsonwebtoken reads PKCS#1 DER reliably, so the key is re-encoded.
        let pkcs1_der = private_key
            .to_pkcs1_der()
            .map_err(|e| invalid_key(format!("PKCS#1 conversion failed: {e}")))?;
        let key = EncodingKey::from_rsa_der(pkcs1_der.as_bytes());

        let public_key = private_key.to_public_key();
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let kid = jwk_thumbprint(&n, &e);

        let jwk = json!({
            "kty": "RSA",
            "n": n,
            "e": e,
            "alg": format!("{:?}", algorithm),
            "use": "sig",
            "kid": kid,
        });
        Ok((key, Some(jwk)))
    }

    fn kid(&self) -> Option<&str> {
        self.public_jwk.as_ref().and_then(|jwk| jwk.get("kid")).and_then(|kid| kid.as_str())
    }

    /// Mints a token asserting `identity`, with `sub` set to the username.
    pub fn mint(&self, identity: &Identity) -> Result<String, NilaGatewayError> {
        let now = get_current_timestamp();
        let claims = UpstreamClaims {
            iss: &self.config.issuer,
            sub: &identity.username,
            aud: self.config.audience.as_deref(),
            iat: now,
            exp: now.saturating_add(self.config.token_ttl_seconds),
            jti: Uuid::new_v4().to_string(),
            groups: &identity.groups,
            staff: identity.staff,
        };

        let mut header = Header::new(self.config.algorithm);
        header.kid = self.kid().map(str::to_string);
        debug!(sub = %identity.username, kid = ?header.kid, "Minting upstream token");

        encode(&header, &claims, &self.encoding_key).map_err(|e| NilaGatewayError::PropagationFailed(e.to_string()))
    }

    /// Returns the public JWKS for the signing key, if it is asymmetric.
    ///
    /// Upstream services verify minted tokens against this document.
    pub fn public_jwks(&self) -> Option<serde_json::Value> {
        self.public_jwk.as_ref().map(|jwk| json!({ "keys": [jwk] }))
    }
}

/// Computes the RFC 7638 thumbprint of an RSA public key.
fn jwk_thumbprint(n: &str, e: &str) -> String {
    // Members in lexicographic order, no whitespace.
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}
