// src/discovery.rs

use crate::error::NilaGatewayError;
use crate::http::fetch;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

/// The two provider endpoints the gateway needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDocument {
    pub userinfo_endpoint: Url,
    pub jwks_uri: Url,
}

/// Resolves discovery URIs into `DiscoveryDocument`s and caches them.
///
/// Documents are reused for `ttl`; concurrent callers resolving the same URI
/// share one request.
#[derive(Clone)]
pub struct DiscoveryResolver {
    http_client: reqwest::Client,
    cache: Cache<String, Arc<DiscoveryDocument>>,
}

impl DiscoveryResolver {
    pub fn new(http_client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http_client,
            cache: Cache::builder().max_capacity(16).time_to_live(ttl).build(),
        }
    }

    /// Returns the endpoints published at `discovery_uri`.
    #[instrument(skip(self, cancel), err(level = "debug"))]
    pub async fn resolve(
        &self,
        discovery_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<DiscoveryDocument>, NilaGatewayError> {
        let discovery_uri = discovery_uri.trim();
        if discovery_uri.is_empty() {
            return Err(NilaGatewayError::InvalidConfiguration("empty discovery endpoint".to_string()));
        }
        let url = Url::parse(discovery_uri)
            .map_err(|e| NilaGatewayError::InvalidConfiguration(format!("discovery endpoint: {e}")))?;

        // The shared fetch outlives any one request; a cancelled caller only stops waiting for it.
        let http_client = self.http_client.clone();
        let load = self.cache.try_get_with(discovery_uri.to_string(), async move {
            debug!("Performing OIDC discovery at: {}", url);
            let (_, body) = fetch(http_client.get(url), &CancellationToken::new())
                .await
                .map_err(|e| e.into_gateway_error(NilaGatewayError::DiscoveryUnreachable))?;
            let document = parse_discovery_document(&body)?;
            info!(
                userinfo_endpoint = %document.userinfo_endpoint,
                jwks_uri = %document.jwks_uri,
                "Resolved OIDC discovery document"
            );
            Ok::<_, NilaGatewayError>(Arc::new(document))
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(NilaGatewayError::Cancelled),
            result = load => result.map_err(|e: Arc<NilaGatewayError>| (*e).clone()),
        }
    }
}

/// Extracts the user-info and JWKS endpoints from a raw discovery response.
pub fn parse_discovery_document(body: &[u8]) -> Result<DiscoveryDocument, NilaGatewayError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| NilaGatewayError::DiscoveryMalformed(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| NilaGatewayError::DiscoveryMalformed(format!("expected an object, got {}", json_type(&value))))?;

    let endpoint = |field: &str| -> Result<Url, NilaGatewayError> {
        let invalid = |found: String| NilaGatewayError::DiscoveryFieldInvalid {
            field: field.to_string(),
            found,
        };
        match object.get(field) {
            Some(Value::String(raw)) => Url::parse(raw).map_err(|e| invalid(format!("unparsable URL ({e})"))),
            Some(other) => Err(invalid(json_type(other).to_string())),
            None => Err(invalid("nothing".to_string())),
        }
    };

    Ok(DiscoveryDocument {
        userinfo_endpoint: endpoint("userinfo_endpoint")?,
        jwks_uri: endpoint("jwks_uri")?,
    })
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_userinfo_endpoint_names_the_field() {
        let body = br#"{"userinfo_endpoint": 123, "jwks_uri": "https://idp/jwks"}"#;
        match parse_discovery_document(body) {
            Err(NilaGatewayError::DiscoveryFieldInvalid { field, found }) => {
                assert_eq!(field, "userinfo_endpoint");
                assert_eq!(found, "number");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_jwks_uri_names_the_field() {
        let body = br#"{"userinfo_endpoint": "https://idp/userinfo"}"#;
        assert!(matches!(
            parse_discovery_document(body),
            Err(NilaGatewayError::DiscoveryFieldInvalid { field, .. }) if field == "jwks_uri"
        ));
    }

    #[test]
    fn non_object_bodies_are_malformed() {
        assert!(matches!(parse_discovery_document(b"[]"), Err(NilaGatewayError::DiscoveryMalformed(_))));
        assert!(matches!(parse_discovery_document(b"<html>"), Err(NilaGatewayError::DiscoveryMalformed(_))));
    }

    #[test]
    fn valid_document_is_parsed() {
        let body = br#"{"issuer": "https://idp", "userinfo_endpoint": "https://idp/userinfo", "jwks_uri": "https://idp/jwks"}"#;
        let document = parse_discovery_document(body).unwrap();
        assert_eq!(document.userinfo_endpoint.as_str(), "https://idp/userinfo");
        assert_eq!(document.jwks_uri.as_str(), "https://idp/jwks");
    }
}
