// src/validator.rs

pub mod model;

use crate::config::ValidationDetails;
use crate::error::NilaGatewayError;
use crate::jwks::{KeySet, KeySetCache};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, get_current_timestamp, DecodingKey, Header, Validation};
use model::AccessTokenClaims;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

/// The claim set of an access token that passed signature, time and audience checks.
///
/// A `VerifiedToken` belongs to the request that produced it and is never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
    pub issuer: Option<String>,
    pub expires_at: u64,
    pub issued_at: Option<u64>,
    pub not_before: Option<u64>,
    pub audience: Vec<String>,
}

/// Verifies access tokens against the provider's signing keys.
///
/// This struct is initialized once with the expected audience and validation
/// details and reused for all requests.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    audience: String,
    details: ValidationDetails,
}

impl TokenValidator {
    /// Creates a new `TokenValidator` for tokens issued to `audience`.
    pub fn new(audience: impl Into<String>, details: ValidationDetails) -> Self {
        Self {
            audience: audience.into(),
            details,
        }
    }

    /// Validates an access token, fetching keys from `key_sets` as needed.
    ///
    /// A token whose key id is not in the current set triggers exactly one
    /// refresh of the set before the token is rejected.
    #[instrument(skip(self, token, key_sets, jwks_uri, cancel), err(level = "debug"))]
    pub async fn validate(
        &self,
        token: &str,
        key_sets: &KeySetCache,
        jwks_uri: &Url,
        cancel: &CancellationToken,
    ) -> Result<VerifiedToken, NilaGatewayError> {
        let header = self.decode_header(token)?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| NilaGatewayError::TokenMalformed("the token header has no 'kid'".to_string()))?;

        let keys = match key_sets.get(jwks_uri, cancel).await? {
            keys if keys.contains(kid) => keys,
            stale => {
                debug!("Unknown kid '{}', refreshing the key set", kid);
                key_sets.refresh(jwks_uri, &stale, cancel).await?
            }
        };

        self.verify_with(token, &header, &keys)
    }

    /// Validates an access token against an already loaded key set.
    pub fn verify(&self, token: &str, keys: &KeySet) -> Result<VerifiedToken, NilaGatewayError> {
        let header = self.decode_header(token)?;
        self.verify_with(token, &header, keys)
    }

    fn decode_header(&self, token: &str) -> Result<Header, NilaGatewayError> {
        let header = decode_header(token).map_err(|e| NilaGatewayError::TokenMalformed(e.to_string()))?;
        if !self.details.algorithms.contains(&header.alg) {
            return Err(NilaGatewayError::TokenSignatureInvalid(format!(
                "algorithm {:?} is not permitted",
                header.alg
            )));
        }
        Ok(header)
    }

    fn verify_with(&self, token: &str, header: &Header, keys: &KeySet) -> Result<VerifiedToken, NilaGatewayError> {
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| NilaGatewayError::TokenMalformed("the token header has no 'kid'".to_string()))?;
        let key = keys
            .get(kid)
            .ok_or_else(|| NilaGatewayError::TokenSignatureInvalid(format!("no signing key with kid '{kid}'")))?;

        let claims = self.decode_claims(token, header, key)?;
        let leeway = self.details.leeway.as_secs();

        // Signature, `exp` and `nbf` are checked by `decode`; the rest follows in the same order.
        if let Some(iat) = claims.iat {
            if iat > get_current_timestamp().saturating_add(leeway) {
                return Err(NilaGatewayError::TokenIssuedInFuture);
            }
        }

        let audience = match claims.aud {
            Some(audience) if audience.contains(&self.audience) => audience.into_vec(),
            _ => return Err(NilaGatewayError::TokenAudienceInvalid),
        };

        Ok(VerifiedToken {
            subject: claims.sub,
            issuer: claims.iss,
            expires_at: claims.exp,
            issued_at: claims.iat,
            not_before: claims.nbf,
            audience,
        })
    }

    fn decode_claims(&self, token: &str, header: &Header, key: &DecodingKey) -> Result<AccessTokenClaims, NilaGatewayError> {
        let mut validation = Validation::new(header.alg);
        validation.leeway = self.details.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // Audience is checked after `iat` so that failures are reported in a fixed order.
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<AccessTokenClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidEcdsaKey
                | ErrorKind::RsaFailedSigning
                | ErrorKind::Crypto(_) => NilaGatewayError::TokenSignatureInvalid(e.to_string()),
                ErrorKind::ExpiredSignature => NilaGatewayError::TokenExpired,
                ErrorKind::ImmatureSignature => NilaGatewayError::TokenNotYetValid,
                _ => NilaGatewayError::TokenMalformed(e.to_string()),
            })
    }
}
