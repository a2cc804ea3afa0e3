// src/error.rs

use reqwest::StatusCode;
use thiserror::Error;

/// The primary error type for the `nila-oidc-gateway` library.
///
/// Every stage of the authentication pipeline fails with exactly one of these
/// variants. Variants only carry owned strings so the error can be cloned and
/// handed to every caller waiting on a shared fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NilaGatewayError {
    /// The gateway configuration is missing a value or contains an invalid one.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The discovery document could not be requested.
    #[error("Discovery request failed: {0}")]
    DiscoveryUnreachable(String),

    /// The discovery response was not a JSON object.
    #[error("Discovery response could not be parsed: {0}")]
    DiscoveryMalformed(String),

    /// A field required from the discovery document is absent or has the wrong type.
    #[error("Discovery field '{field}' is expected to be a URL string, got: {found}")]
    DiscoveryFieldInvalid { field: String, found: String },

    /// The JSON Web Key Set could not be downloaded.
    #[error("JWKS download failed: {0}")]
    KeySetUnreachable(String),

    /// The JSON Web Key Set could not be parsed.
    #[error("JWKS could not be parsed: {0}")]
    KeySetMalformed(String),

    /// The request carries no `Authorization` header value.
    #[error("The Authorization header is missing or empty")]
    HeaderMissing,

    /// The `Authorization` header does not follow `<scheme> <token>`.
    #[error("The Authorization header is malformed")]
    HeaderMalformed,

    /// The `Authorization` header uses a scheme other than `Bearer`.
    #[error("Unsupported authorization scheme: {0}")]
    SchemeUnsupported(String),

    /// The bearer token is not a well-formed JWT.
    #[error("Malformed access token: {0}")]
    TokenMalformed(String),

    /// The token signature could not be verified against the key set.
    #[error("Invalid access token signature: {0}")]
    TokenSignatureInvalid(String),

    #[error("The access token has expired")]
    TokenExpired,

    #[error("The access token is not valid yet")]
    TokenNotYetValid,

    #[error("The access token has been issued in the future")]
    TokenIssuedInFuture,

    #[error("The access token has not been issued for this audience")]
    TokenAudienceInvalid,

    /// The user-info endpoint could not be requested.
    #[error("Userinfo request failed: {0}")]
    UserinfoUnreachable(String),

    /// The user-info response was not a JSON object.
    #[error("Userinfo response could not be parsed: {0}")]
    UserinfoMalformed(String),

    #[error("Userinfo response is missing the 'sub' field")]
    UserinfoMissingSubject,

    /// The user-info subject differs from the access token subject.
    #[error("Userinfo subject '{userinfo_subject}' does not match token subject '{token_subject}'")]
    SubjectMismatch {
        token_subject: String,
        userinfo_subject: String,
    },

    #[error("Userinfo response is missing the 'preferred_username' field")]
    UserinfoMissingUsername,

    #[error("Userinfo response is missing the 'groups' field")]
    UserinfoMissingGroups,

    /// An element of the user-info `groups` array is not a string.
    #[error("Userinfo group at index {index} is not a string")]
    UserinfoGroupTypeInvalid { index: usize },

    /// The verified identity could not be written to the upstream request.
    #[error("Identity propagation failed: {0}")]
    PropagationFailed(String),

    /// The inbound request was aborted while an outbound call was in flight.
    #[error("The request was cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NilaGatewayError {
    /// The stable, machine-readable error code sent to clients.
    ///
    /// These strings are part of the external contract and must never change.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "gateway.INVALID_CONFIGURATION",
            Self::DiscoveryUnreachable(_) => "gateway.OPENID_CONNECT_DISCOVERY_REQUEST_FAILURE",
            Self::DiscoveryMalformed(_) => "gateway.OPENID_CONNECT_DISCOVERY_RESPONSE_PARSE_ERROR",
            Self::DiscoveryFieldInvalid { .. } => "gateway.OPENID_CONNECT_DISCOVERY_INVALID_FIELD_TYPE",
            Self::KeySetUnreachable(_) => "gateway.OPENID_CONNECT_JWKS_DOWNLOAD_ERROR",
            Self::KeySetMalformed(_) => "gateway.OPENID_CONNECT_JWKS_PARSE_ERROR",
            Self::HeaderMissing => "gateway.MISSING_AUTHORIZATION_HEADER",
            Self::HeaderMalformed => "gateway.MALFORMED_AUTHORIZATION_HEADER",
            Self::SchemeUnsupported(_) => "gateway.UNSUPPORTED_AUTHORIZATION_SCHEME",
            Self::TokenMalformed(_) => "gateway.TOKEN_MALFORMED",
            Self::TokenSignatureInvalid(_) => "gateway.TOKEN_INVALID_SIGNATURE",
            Self::TokenExpired => "gateway.TOKEN_EXPIRED",
            Self::TokenNotYetValid => "gateway.TOKEN_USED_TOO_EARLY",
            Self::TokenIssuedInFuture => "gateway.TOKEN_ISSUED_IN_FUTURE",
            Self::TokenAudienceInvalid => "gateway.TOKEN_INVALID_AUDIENCE",
            Self::UserinfoUnreachable(_) => "gateway.USERINFO_REQUEST_FAILURE",
            Self::UserinfoMalformed(_) => "gateway.USERINFO_PARSE_ERROR",
            Self::UserinfoMissingSubject => "gateway.USERINFO_MISSING_SUBJECT",
            Self::SubjectMismatch { .. } => "gateway.USERINFO_SUBJECT_MISMATCH",
            Self::UserinfoMissingUsername => "gateway.USERINFO_MISSING_USERNAME",
            Self::UserinfoMissingGroups => "gateway.USERINFO_MISSING_GROUPS",
            Self::UserinfoGroupTypeInvalid { .. } => "gateway.USERINFO_INVALID_GROUP_TYPE",
            Self::PropagationFailed(_) => "gateway.IDENTITY_PROPAGATION_FAILURE",
            Self::Cancelled | Self::Internal(_) => "gateway.INTERNAL_ERROR",
        }
    }

    /// The HTTP status the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::HeaderMissing | Self::HeaderMalformed | Self::SchemeUnsupported(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::TokenMalformed(_)
            | Self::TokenSignatureInvalid(_)
            | Self::TokenExpired
            | Self::TokenNotYetValid
            | Self::TokenIssuedInFuture
            | Self::TokenAudienceInvalid
            | Self::SubjectMismatch { .. } => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
