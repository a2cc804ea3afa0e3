// src/problem.rs

use crate::error::NilaGatewayError;
use reqwest::StatusCode;
use serde::Serialize;

/// Media type of every error body sent by the gateway.
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json; charset=utf-8";

const BAD_REQUEST_TYPE: &str = "https://www.rfc-editor.org/rfc/rfc9110#section-15.5.1";
const UNAUTHORIZED_TYPE: &str = "https://www.rfc-editor.org/rfc/rfc9110#section-15.5.2";
const INTERNAL_ERROR_TYPE: &str = "https://www.rfc-editor.org/rfc/rfc9110#section-15.6.1";

const CONTACT_ADMINISTRATOR: &str = "Please contact your administrator for further assistance.";
const CHALLENGE_SCOPE: &str = "openid profile email";

/// The client-visible error produced for a failed request.
///
/// A fresh value is built for every failure; nothing here is shared between
/// requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemResponse {
    #[serde(rename = "type")]
    pub problem_type: String,
    /// Stable error code, e.g. `gateway.TOKEN_EXPIRED`.
    pub error: String,
    pub title: String,
    pub detail: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Value for the `WWW-Authenticate` response header, if one is sent.
    #[serde(skip)]
    pub challenge: Option<String>,
}

impl ProblemResponse {
    /// Maps a pipeline error to its problem response.
    pub fn from_error(error: &NilaGatewayError) -> Self {
        use NilaGatewayError::*;

        let (title, detail): (&str, String) = match error {
            InvalidConfiguration(_) => (
                "Gateway Misconfigured",
                format!("The plugin used for authenticating requests is misconfigured. {CONTACT_ADMINISTRATOR}"),
            ),
            DiscoveryUnreachable(_) => (
                "OIDC Discovery Failed",
                format!("The discovery of the endpoints required for validating the authorization failed. {CONTACT_ADMINISTRATOR}"),
            ),
            DiscoveryMalformed(_) => (
                "OIDC Discovery Response Parsing Failed",
                format!("The discovery response sent by the identity provider could not be read. {CONTACT_ADMINISTRATOR}"),
            ),
            DiscoveryFieldInvalid { .. } => (
                "OIDC Discovery Response Invalid Field Type",
                format!("The discovery response contained an invalid value on at least one field. {CONTACT_ADMINISTRATOR}"),
            ),
            KeySetUnreachable(_) => (
                "JWKS Download Error",
                format!("The keys needed for validating the access token could not be downloaded. {CONTACT_ADMINISTRATOR}"),
            ),
            KeySetMalformed(_) => (
                "JWKS Parsing Error",
                format!("The keys needed for validating the access token could not be read. {CONTACT_ADMINISTRATOR}"),
            ),
            HeaderMissing => (
                "Missing Authorization Header",
                "The request does not contain an 'Authorization' header.".to_string(),
            ),
            HeaderMalformed => (
                "Malformed Authorization Header",
                "The 'Authorization' header does not match the format '<scheme> <token>'.".to_string(),
            ),
            SchemeUnsupported(_) => (
                "Unsupported Authorization Scheme",
                "The 'Authorization' header must use the 'Bearer' scheme.".to_string(),
            ),
            TokenMalformed(_) => (
                "Access Token Malformed",
                "The access token in the 'Authorization' header is not a valid JSON Web Token.".to_string(),
            ),
            TokenSignatureInvalid(_) => (
                "Access Token Signature Invalid",
                "The signature of the access token in the 'Authorization' header could not be verified.".to_string(),
            ),
            TokenExpired => (
                "Access Token Expired",
                "The access token in the 'Authorization' header has expired.".to_string(),
            ),
            TokenNotYetValid => (
                "Access Token Used Too Early",
                "The access token in the 'Authorization' header is not valid yet. Please try again later.".to_string(),
            ),
            TokenIssuedInFuture => (
                "Access Token Issued In Future",
                "The access token in the 'Authorization' header has been issued in the future.".to_string(),
            ),
            TokenAudienceInvalid => (
                "Access Token Invalid Audience",
                "The access token in the 'Authorization' header has not been issued for this platform.".to_string(),
            ),
            UserinfoUnreachable(_) => (
                "Userinfo Request Failure",
                format!("The information about the identified user could not be requested. {CONTACT_ADMINISTRATOR}"),
            ),
            UserinfoMalformed(_) => (
                "Userinfo Parsing Failure",
                format!("The information about the identified user could not be parsed. {CONTACT_ADMINISTRATOR}"),
            ),
            UserinfoMissingSubject => (
                "Userinfo Response Missing Subject",
                "The information about the identified user does not contain a subject, so it cannot be associated with the access token.".to_string(),
            ),
            SubjectMismatch { .. } => (
                "Subject Mismatch",
                "The information about the identified user belongs to a different subject than the access token.".to_string(),
            ),
            UserinfoMissingUsername => (
                "Userinfo Response Missing Username",
                "The information about the identified user does not contain a username.".to_string(),
            ),
            UserinfoMissingGroups => (
                "Userinfo Response Missing Groups",
                "The information about the identified user does not contain information about groups.".to_string(),
            ),
            UserinfoGroupTypeInvalid { .. } => (
                "Userinfo Response Invalid Group",
                "The information about the identified user contains a group that is not a string.".to_string(),
            ),
            PropagationFailed(_) => (
                "Identity Propagation Failure",
                format!("The verified identity could not be forwarded to the service. {CONTACT_ADMINISTRATOR}"),
            ),
            Cancelled | Internal(_) => (
                "Generic Internal Error",
                "The API gateway experienced an internal error, which has not been handled correctly.".to_string(),
            ),
        };

        let status = error.status();
        let problem_type = match status {
            StatusCode::BAD_REQUEST => BAD_REQUEST_TYPE,
            StatusCode::UNAUTHORIZED => UNAUTHORIZED_TYPE,
            _ => INTERNAL_ERROR_TYPE,
        };
        let challenge = match status {
            StatusCode::BAD_REQUEST => Some(bearer_challenge("invalid_request", title)),
            StatusCode::UNAUTHORIZED => Some(bearer_challenge("invalid_token", title)),
            _ => None,
        };

        Self {
            problem_type: problem_type.to_string(),
            error: error.code().to_string(),
            title: title.to_string(),
            detail,
            status: status.as_u16(),
            instance: None,
            challenge,
        }
    }

    /// Sets the `instance` member, usually to the request id.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Serializes the problem into the response body.
    pub fn to_body(&self) -> Vec<u8> {
        // A struct of strings and integers always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl From<&NilaGatewayError> for ProblemResponse {
    fn from(error: &NilaGatewayError) -> Self {
        Self::from_error(error)
    }
}

fn bearer_challenge(error: &str, description: &str) -> String {
    format!(r#"Bearer scope="{CHALLENGE_SCOPE}", error="{error}", error_description="{description}""#)
}
