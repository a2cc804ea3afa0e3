// src/gateway.rs

use crate::bearer::extract_bearer_token;
use crate::config::{Config, EndpointSource, PropagationMode};
use crate::discovery::DiscoveryResolver;
use crate::error::NilaGatewayError;
use crate::generator::TokenMinter;
use crate::http::build_client;
use crate::identity::{Identity, IdentityResolver};
use crate::jwks::store::KeySetStore;
use crate::jwks::KeySetCache;
use crate::problem::ProblemResponse;
use crate::propagation::{HeaderNames, Propagator, RequestHeaders};
use crate::request_id::ensure_request_id;
use crate::validator::{TokenValidator, VerifiedToken};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Span};
use url::Url;

/// The provider endpoints a request is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub jwks_uri: Url,
    pub userinfo_endpoint: Url,
}

/// The authentication pipeline for one protected upstream.
///
/// A `Gateway` is built once from a validated `Config` and shared by all
/// requests. Cloning is cheap; clones share the discovery and key set caches.
#[derive(Clone)]
pub struct Gateway {
    endpoints: EndpointSource,
    discovery: DiscoveryResolver,
    key_sets: KeySetCache,
    validator: TokenValidator,
    identities: IdentityResolver,
    propagator: Arc<Propagator>,
}

impl Gateway {
    /// Creates a new `Gateway`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the HTTP client cannot be built or the
    /// signing key for minted tokens cannot be loaded.
    pub fn new(config: Config) -> Result<Self, NilaGatewayError> {
        Self::build(config, None)
    }

    /// Creates a new `Gateway` that persists fetched key sets in `store`.
    pub fn with_key_set_store(config: Config, store: Arc<dyn KeySetStore>) -> Result<Self, NilaGatewayError> {
        Self::build(config, Some(store))
    }

    fn build(config: Config, store: Option<Arc<dyn KeySetStore>>) -> Result<Self, NilaGatewayError> {
        let http_client = build_client(config.http_timeout)?;
        let names = HeaderNames::for_product(&config.product_name);
        let propagator = match config.propagation {
            PropagationMode::Headers => Propagator::Headers(names),
            PropagationMode::MintedToken(generator) => Propagator::MintedToken {
                names,
                minter: TokenMinter::new(generator)?,
            },
        };

        info!(client_id = %config.client_id, "Gateway initialized");
        Ok(Self {
            endpoints: config.endpoints,
            discovery: DiscoveryResolver::new(http_client.clone(), config.discovery_ttl),
            key_sets: KeySetCache::new(http_client.clone(), config.key_set_ttl, store),
            validator: TokenValidator::new(config.client_id, config.validation),
            identities: IdentityResolver::new(http_client),
            propagator: Arc::new(propagator),
        })
    }

    /// Returns the JWKS and user-info endpoints, resolving discovery if configured.
    pub async fn endpoints(&self, cancel: &CancellationToken) -> Result<ResolvedEndpoints, NilaGatewayError> {
        match &self.endpoints {
            EndpointSource::Discovery { discovery_uri } => {
                let document = self.discovery.resolve(discovery_uri.as_str(), cancel).await?;
                Ok(ResolvedEndpoints {
                    jwks_uri: document.jwks_uri.clone(),
                    userinfo_endpoint: document.userinfo_endpoint.clone(),
                })
            }
            EndpointSource::Explicit { jwks_uri, userinfo_uri } => Ok(ResolvedEndpoints {
                jwks_uri: jwks_uri.clone(),
                userinfo_endpoint: userinfo_uri.clone(),
            }),
        }
    }

    /// Verifies the credential in an `Authorization` header value and resolves its identity.
    ///
    /// Stops at the first failure. Malformed header values fail before any call
    /// to the identity provider.
    pub async fn authenticate(
        &self,
        authorization: &str,
        cancel: &CancellationToken,
    ) -> Result<(VerifiedToken, Identity), NilaGatewayError> {
        let token = extract_bearer_token(authorization)?;
        let endpoints = self.endpoints(cancel).await?;
        let verified = self
            .validator
            .validate(token, &self.key_sets, &endpoints.jwks_uri, cancel)
            .await?;
        let identity = self
            .identities
            .resolve(&verified, token, &endpoints.userinfo_endpoint, cancel)
            .await?;
        Ok((verified, identity))
    }

    /// Authenticates a proxied request and writes the identity onto its headers.
    ///
    /// On failure the returned `ProblemResponse` should be sent to the client
    /// and the request must not be forwarded. Its `instance` is the request id.
    #[instrument(skip_all, fields(request_id = tracing::field::Empty))]
    pub async fn authorize_request<H: RequestHeaders + ?Sized>(
        &self,
        headers: &mut H,
        cancel: &CancellationToken,
    ) -> Result<Identity, ProblemResponse> {
        let request_id = ensure_request_id(headers);
        Span::current().record("request_id", request_id.as_str());

        let result = match authorization_value(&*headers) {
            Ok(authorization) => match self.authenticate(&authorization, cancel).await {
                Ok((_, identity)) => self.propagator.apply(&identity, headers).map(|()| identity),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            let problem = ProblemResponse::from_error(&e).with_instance(request_id);
            match e {
                NilaGatewayError::Cancelled => debug!("Request aborted by the client"),
                _ if problem.status >= 500 => error!(code = e.code(), "Request rejected: {}", e),
                _ => warn!(code = e.code(), "Request rejected: {}", e),
            }
            problem
        })
    }

    /// Starts refreshing the key set in the background until `shutdown` fires.
    pub async fn spawn_key_refresh(&self, shutdown: CancellationToken) -> Result<JoinHandle<()>, NilaGatewayError> {
        let endpoints = self.endpoints(&shutdown).await?;
        Ok(self.key_sets.spawn_refresh_task(endpoints.jwks_uri, shutdown))
    }

    /// The JWKS upstream services use to verify minted tokens.
    ///
    /// `None` in header mode or when minted tokens use a shared secret.
    pub fn public_jwks(&self) -> Option<serde_json::Value> {
        match self.propagator.as_ref() {
            Propagator::MintedToken { minter, .. } => minter.public_jwks(),
            Propagator::Headers(_) => None,
        }
    }
}

/// Reads the `Authorization` header; an absent header reads as empty.
fn authorization_value<H: RequestHeaders + ?Sized>(headers: &H) -> Result<String, NilaGatewayError> {
    let name = reqwest::header::AUTHORIZATION.as_str();
    match headers.header(name) {
        Some(value) => Ok(value.to_string()),
        None if headers.contains_header(name) => Err(NilaGatewayError::HeaderMalformed),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

    #[test]
    fn non_ascii_authorization_is_malformed() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_bytes("Bearer t\u{f6}ken".as_bytes()).unwrap());
        assert_eq!(authorization_value(&headers), Err(NilaGatewayError::HeaderMalformed));
    }

    #[test]
    fn absent_authorization_reads_as_empty() {
        assert_eq!(authorization_value(&HeaderMap::new()), Ok(String::new()));
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(authorization_value(&headers), Ok("Bearer abc".to_string()));
    }
}
