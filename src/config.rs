// src/config.rs

use crate::error::NilaGatewayError;
use crate::generator::GeneratorConfig;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Contains the validation settings for inbound access tokens.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted for access tokens.
    /// Tokens signed with any other algorithm will be rejected.
    pub algorithms: Vec<Algorithm>,
    /// The tolerance for clock skew when validating `exp`, `nbf` and `iat`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
        }
    }
}

/// Defines where the gateway learns the identity provider endpoints from.
#[derive(Clone, Debug)]
pub enum EndpointSource {
    /// The endpoints are read from the provider's discovery document.
    Discovery { discovery_uri: Url },
    /// The endpoints are configured directly and discovery is skipped.
    Explicit { jwks_uri: Url, userinfo_uri: Url },
}

/// How the verified identity is handed to the upstream service.
#[derive(Clone, Debug)]
pub enum PropagationMode {
    /// Discrete identity headers (`X-<Product>-User`, `X-Authenticated-User`, ...).
    Headers,
    /// A short-lived token minted by the gateway, sent as the upstream bearer credential.
    MintedToken(GeneratorConfig),
}

/// The main configuration for the gateway.
///
/// It should be constructed using the `ConfigBuilder`.
#[derive(Clone, Debug)]
pub struct Config {
    pub endpoints: EndpointSource,
    /// The client ID of the gateway, as registered with the identity provider.
    /// Access tokens must list it in their `aud` claim.
    pub client_id: String,
    pub validation: ValidationDetails,
    /// How long a fetched JWKS is cached if the response has no `Cache-Control` header.
    pub key_set_ttl: Duration,
    /// How long a resolved discovery document is reused.
    pub discovery_ttl: Duration,
    /// Upper bound for every outbound call to the identity provider.
    pub http_timeout: Duration,
    /// Product name used in the `X-<Product>-User` and `X-<Product>-Groups` headers.
    pub product_name: String,
    pub propagation: PropagationMode,
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    discovery_uri: Option<Url>,
    jwks_uri: Option<Url>,
    userinfo_uri: Option<Url>,
    client_id: Option<String>,
    key_set_ttl: Option<Duration>,
    discovery_ttl: Option<Duration>,
    http_timeout: Option<Duration>,
    product_name: Option<String>,
    generator: Option<GeneratorConfig>,
    validation: ValidationDetails,
}

fn parse_url(url: &str, field: &str) -> Result<Url, NilaGatewayError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(NilaGatewayError::InvalidConfiguration(format!("{field} is empty")));
    }
    Url::parse(url).map_err(|e| NilaGatewayError::InvalidConfiguration(format!("{field}: {e}")))
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder from the process environment.
    ///
    /// Reads `OIDC_AUTHORITY` (discovery URI), `OIDC_CLIENT_ID`, and the optional
    /// `OIDC_JWKS_URI`, `OIDC_USERINFO_URI` and `GATEWAY_PRODUCT_NAME`. Setting
    /// both explicit URIs selects the no-discovery mode.
    pub fn from_env() -> Result<Self, NilaGatewayError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut builder = Self::new();
        match (var("OIDC_JWKS_URI"), var("OIDC_USERINFO_URI")) {
            (Some(jwks), Some(userinfo)) => {
                builder = builder.jwks_uri(&jwks)?.userinfo_uri(&userinfo)?;
            }
            _ => {
                let authority = var("OIDC_AUTHORITY").ok_or_else(|| {
                    NilaGatewayError::InvalidConfiguration("OIDC_AUTHORITY is not set".to_string())
                })?;
                builder = builder.discovery_uri(&authority)?;
            }
        }
        let client_id = var("OIDC_CLIENT_ID").ok_or_else(|| {
            NilaGatewayError::InvalidConfiguration("OIDC_CLIENT_ID is not set".to_string())
        })?;
        builder = builder.client_id(client_id);
        if let Some(product) = var("GATEWAY_PRODUCT_NAME") {
            builder = builder.product_name(product);
        }
        Ok(builder)
    }

    /// Sets the OpenID Connect discovery URI, e.g.
    /// `https://idp.example.com/.well-known/openid-configuration`.
    pub fn discovery_uri(mut self, url: &str) -> Result<Self, NilaGatewayError> {
        if self.jwks_uri.is_some() || self.userinfo_uri.is_some() {
            return Err(NilaGatewayError::InvalidConfiguration(
                "Cannot set a discovery URI when explicit endpoints are already configured.".to_string(),
            ));
        }
        self.discovery_uri = Some(parse_url(url, "discovery_uri")?);
        Ok(self)
    }

    /// Sets an explicit JWKS URI, bypassing discovery. Requires `userinfo_uri` too.
    pub fn jwks_uri(mut self, url: &str) -> Result<Self, NilaGatewayError> {
        if self.discovery_uri.is_some() {
            return Err(NilaGatewayError::InvalidConfiguration(
                "Cannot set a JWKS URI when a discovery URI is already configured.".to_string(),
            ));
        }
        self.jwks_uri = Some(parse_url(url, "jwks_uri")?);
        Ok(self)
    }

    /// Sets an explicit user-info URI, bypassing discovery. Requires `jwks_uri` too.
    pub fn userinfo_uri(mut self, url: &str) -> Result<Self, NilaGatewayError> {
        if self.discovery_uri.is_some() {
            return Err(NilaGatewayError::InvalidConfiguration(
                "Cannot set a userinfo URI when a discovery URI is already configured.".to_string(),
            ));
        }
        self.userinfo_uri = Some(parse_url(url, "userinfo_uri")?);
        Ok(self)
    }

    /// Sets the client ID expected in the token audience. This is a required field.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the allowed signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Sets the fallback cache TTL for the JWKS. Defaults to 24 hours.
    pub fn key_set_ttl(mut self, ttl: Duration) -> Self {
        self.key_set_ttl = Some(ttl);
        self
    }

    /// Sets how long a discovery document is reused. Defaults to one hour.
    pub fn discovery_ttl(mut self, ttl: Duration) -> Self {
        self.discovery_ttl = Some(ttl);
        self
    }

    /// Sets the timeout of outbound identity provider calls. Defaults to 10 seconds.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Sets the product name used in the product specific identity headers.
    pub fn product_name(mut self, product: impl Into<String>) -> Self {
        self.product_name = Some(product.into());
        self
    }

    /// Switches propagation to gateway-minted tokens signed as configured.
    pub fn mint_tokens(mut self, generator: GeneratorConfig) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the endpoint source or `client_id` is
    /// missing, or if any value is out of range.
    pub fn build(self) -> Result<Config, NilaGatewayError> {
        let endpoints = match (self.discovery_uri, self.jwks_uri, self.userinfo_uri) {
            (Some(discovery_uri), None, None) => EndpointSource::Discovery { discovery_uri },
            (None, Some(jwks_uri), Some(userinfo_uri)) => EndpointSource::Explicit { jwks_uri, userinfo_uri },
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(NilaGatewayError::InvalidConfiguration(
                    "Explicit endpoints require both jwks_uri and userinfo_uri.".to_string(),
                ))
            }
            (None, None, None) => {
                return Err(NilaGatewayError::InvalidConfiguration(
                    "Either discovery_uri or jwks_uri and userinfo_uri must be configured.".to_string(),
                ))
            }
            _ => {
                return Err(NilaGatewayError::InvalidConfiguration(
                    "Both discovery and explicit endpoints configured.".to_string(),
                ))
            }
        };

        let client_id = self
            .client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NilaGatewayError::InvalidConfiguration("client_id is required".to_string()))?;

        if self.validation.algorithms.is_empty() {
            return Err(NilaGatewayError::InvalidConfiguration(
                "At least one signing algorithm must be allowed.".to_string(),
            ));
        }

        let product_name = self.product_name.unwrap_or_else(|| "Nila".to_string());
        if product_name.is_empty() || !product_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(NilaGatewayError::InvalidConfiguration(format!(
                "product_name '{product_name}' cannot be used in a header name"
            )));
        }

        let http_timeout = self.http_timeout.unwrap_or(Duration::from_secs(10));
        if http_timeout.is_zero() {
            return Err(NilaGatewayError::InvalidConfiguration("http_timeout must be positive".to_string()));
        }

        Ok(Config {
            endpoints,
            client_id,
            validation: self.validation,
            key_set_ttl: self.key_set_ttl.unwrap_or_else(|| Duration::from_secs(24 * 60 * 60)),
            discovery_ttl: self.discovery_ttl.unwrap_or_else(|| Duration::from_secs(60 * 60)),
            http_timeout,
            product_name,
            propagation: match self.generator {
                Some(generator) => PropagationMode::MintedToken(generator),
                None => PropagationMode::Headers,
            },
        })
    }
}

/// The gateway settings as they appear in a YAML or JSON configuration file.
///
/// Durations are given in seconds. Unset values keep the `ConfigBuilder`
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySettings {
    pub discovery_uri: Option<String>,
    pub jwks_uri: Option<String>,
    pub userinfo_uri: Option<String>,
    pub client_id: Option<String>,
    pub algorithms: Option<Vec<Algorithm>>,
    pub leeway_seconds: Option<u64>,
    pub key_set_ttl_seconds: Option<u64>,
    pub discovery_ttl_seconds: Option<u64>,
    pub http_timeout_seconds: Option<u64>,
    pub product_name: Option<String>,
    pub mint_tokens: Option<GeneratorConfig>,
}

impl GatewaySettings {
    /// Converts the settings into a builder, checking the endpoint URLs.
    pub fn into_builder(self) -> Result<ConfigBuilder, NilaGatewayError> {
        let mut builder = ConfigBuilder::new();
        if let Some(uri) = &self.discovery_uri {
            builder = builder.discovery_uri(uri)?;
        }
        if let Some(uri) = &self.jwks_uri {
            builder = builder.jwks_uri(uri)?;
        }
        if let Some(uri) = &self.userinfo_uri {
            builder = builder.userinfo_uri(uri)?;
        }
        if let Some(client_id) = self.client_id {
            builder = builder.client_id(client_id);
        }
        if let Some(algorithms) = self.algorithms {
            builder = builder.algorithms(algorithms);
        }
        if let Some(leeway) = self.leeway_seconds {
            builder = builder.leeway(Duration::from_secs(leeway));
        }
        if let Some(ttl) = self.key_set_ttl_seconds {
            builder = builder.key_set_ttl(Duration::from_secs(ttl));
        }
        if let Some(ttl) = self.discovery_ttl_seconds {
            builder = builder.discovery_ttl(Duration::from_secs(ttl));
        }
        if let Some(timeout) = self.http_timeout_seconds {
            builder = builder.http_timeout(Duration::from_secs(timeout));
        }
        if let Some(product) = self.product_name {
            builder = builder.product_name(product);
        }
        if let Some(generator) = self.mint_tokens {
            builder = builder.mint_tokens(generator);
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_and_explicit_endpoints_are_exclusive() {
        let result = ConfigBuilder::new()
            .discovery_uri("https://idp.test/.well-known/openid-configuration")
            .unwrap()
            .jwks_uri("https://idp.test/jwks");
        assert!(matches!(result, Err(NilaGatewayError::InvalidConfiguration(_))));
    }

    #[test]
    fn empty_discovery_uri_is_rejected() {
        let result = ConfigBuilder::new().discovery_uri("   ");
        assert!(matches!(result, Err(NilaGatewayError::InvalidConfiguration(_))));
    }

    #[test]
    fn build_requires_client_id() {
        let result = ConfigBuilder::new()
            .discovery_uri("https://idp.test/.well-known/openid-configuration")
            .unwrap()
            .client_id("  ")
            .build();
        assert!(matches!(result, Err(NilaGatewayError::InvalidConfiguration(_))));
    }

    #[test]
    fn explicit_endpoints_need_both_uris() {
        let result = ConfigBuilder::new()
            .jwks_uri("https://idp.test/jwks")
            .unwrap()
            .client_id("gateway")
            .build();
        assert!(matches!(result, Err(NilaGatewayError::InvalidConfiguration(_))));
    }

    #[test]
    fn defaults_are_applied() {
        let config = ConfigBuilder::new()
            .discovery_uri("https://idp.test/.well-known/openid-configuration")
            .unwrap()
            .client_id("gateway")
            .build()
            .unwrap();
        assert_eq!(config.validation.algorithms, vec![Algorithm::RS256]);
        assert_eq!(config.validation.leeway, Duration::from_secs(60));
        assert_eq!(config.product_name, "Nila");
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert!(matches!(config.propagation, PropagationMode::Headers));
    }

    #[test]
    fn product_name_must_be_header_safe() {
        let result = ConfigBuilder::new()
            .discovery_uri("https://idp.test/.well-known/openid-configuration")
            .unwrap()
            .client_id("gateway")
            .product_name("My Product")
            .build();
        assert!(matches!(result, Err(NilaGatewayError::InvalidConfiguration(_))));
    }
}
