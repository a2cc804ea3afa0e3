// src/identity.rs

use crate::discovery::json_type;
use crate::error::NilaGatewayError;
use crate::http::fetch;
use crate::validator::VerifiedToken;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

/// The verified identity forwarded to the upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Always equal to the subject of the access token it was resolved for.
    pub subject: String,
    pub username: String,
    /// Group memberships in the order the provider listed them.
    pub groups: Vec<String>,
    pub staff: bool,
}

/// Looks up and cross-checks the user behind a verified access token.
#[derive(Clone)]
pub struct IdentityResolver {
    http_client: reqwest::Client,
}

impl IdentityResolver {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Requests the user-info endpoint with the caller's own bearer token.
    #[instrument(skip_all, fields(sub = %token.subject), err(level = "debug"))]
    pub async fn resolve(
        &self,
        token: &VerifiedToken,
        bearer_token: &str,
        userinfo_endpoint: &Url,
        cancel: &CancellationToken,
    ) -> Result<Identity, NilaGatewayError> {
        let request = self.http_client.get(userinfo_endpoint.clone()).bearer_auth(bearer_token);
        let (_, body) = fetch(request, cancel)
            .await
            .map_err(|e| e.into_gateway_error(NilaGatewayError::UserinfoUnreachable))?;

        let identity = identity_from_userinfo(&body, &token.subject)?;
        debug!(username = %identity.username, groups = identity.groups.len(), staff = identity.staff, "Resolved identity");
        Ok(identity)
    }
}

/// Builds an `Identity` from a raw user-info response.
///
/// Fields are checked in a fixed order: `sub` (present, then equal to
/// `expected_subject`), `preferred_username`, `groups`. `staff` never fails
/// the request; anything but a recognised true value yields `false`.
pub fn identity_from_userinfo(body: &[u8], expected_subject: &str) -> Result<Identity, NilaGatewayError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| NilaGatewayError::UserinfoMalformed(e.to_string()))?;
    let userinfo = value
        .as_object()
        .ok_or_else(|| NilaGatewayError::UserinfoMalformed(format!("expected an object, got {}", json_type(&value))))?;

    let subject = userinfo
        .get("sub")
        .and_then(Value::as_str)
        .ok_or(NilaGatewayError::UserinfoMissingSubject)?;
    if subject != expected_subject {
        return Err(NilaGatewayError::SubjectMismatch {
            token_subject: expected_subject.to_string(),
            userinfo_subject: subject.to_string(),
        });
    }

    let username = userinfo
        .get("preferred_username")
        .and_then(Value::as_str)
        .ok_or(NilaGatewayError::UserinfoMissingUsername)?;

    let groups = userinfo
        .get("groups")
        .and_then(Value::as_array)
        .ok_or(NilaGatewayError::UserinfoMissingGroups)?
        .iter()
        .enumerate()
        .map(|(index, group)| {
            group
                .as_str()
                .map(str::to_string)
                .ok_or(NilaGatewayError::UserinfoGroupTypeInvalid { index })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let staff = userinfo
        .get("staff")
        .and_then(Value::as_str)
        .and_then(parse_staff_flag)
        .unwrap_or(false);

    Ok(Identity {
        subject: subject.to_string(),
        username: username.to_string(),
        groups,
        staff,
    })
}

/// Parses the boolean spellings identity providers use for string flags.
pub fn parse_staff_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Identity, NilaGatewayError> {
        identity_from_userinfo(value.to_string().as_bytes(), "user-1")
    }

    #[test]
    fn complete_userinfo_is_accepted() {
        let identity = parse(json!({
            "sub": "user-1",
            "preferred_username": "jdoe",
            "groups": ["b", "a", "c"],
            "staff": "true"
        }))
        .unwrap();
        assert_eq!(identity.username, "jdoe");
        assert_eq!(identity.groups, vec!["b", "a", "c"]);
        assert!(identity.staff);
    }

    #[test]
    fn subject_mismatch_wins_over_other_fields() {
        let result = parse(json!({"sub": "user-2", "preferred_username": "jdoe", "groups": []}));
        assert!(matches!(result, Err(NilaGatewayError::SubjectMismatch { .. })));
    }

    #[test]
    fn required_fields_are_checked_in_order() {
        assert_eq!(parse(json!({"preferred_username": "x"})), Err(NilaGatewayError::UserinfoMissingSubject));
        assert_eq!(parse(json!({"sub": 1})), Err(NilaGatewayError::UserinfoMissingSubject));
        assert_eq!(parse(json!({"sub": "user-1", "groups": []})), Err(NilaGatewayError::UserinfoMissingUsername));
        assert_eq!(
            parse(json!({"sub": "user-1", "preferred_username": "x", "groups": "admins"})),
            Err(NilaGatewayError::UserinfoMissingGroups)
        );
        assert_eq!(
            parse(json!({"sub": "user-1", "preferred_username": "x", "groups": ["a", 7]})),
            Err(NilaGatewayError::UserinfoGroupTypeInvalid { index: 1 })
        );
    }

    #[test]
    fn empty_groups_are_legal() {
        let identity = parse(json!({"sub": "user-1", "preferred_username": "x", "groups": []})).unwrap();
        assert!(identity.groups.is_empty());
    }

    #[test]
    fn staff_defaults_to_false() {
        for staff in [json!(null), json!("yes"), json!(true), json!("FaLsE"), json!(1)] {
            let identity =
                parse(json!({"sub": "user-1", "preferred_username": "x", "groups": [], "staff": staff})).unwrap();
            assert!(!identity.staff);
        }
        let identity = parse(json!({"sub": "user-1", "preferred_username": "x", "groups": []})).unwrap();
        assert!(!identity.staff);
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            identity_from_userinfo(b"<html></html>", "user-1"),
            Err(NilaGatewayError::UserinfoMalformed(_))
        ));
        assert!(matches!(
            identity_from_userinfo(b"\"user-1\"", "user-1"),
            Err(NilaGatewayError::UserinfoMalformed(_))
        ));
    }
}
