// tests/config_test.rs

use nila_oidc_gateway::config::{EndpointSource, GatewaySettings, PropagationMode};
use nila_oidc_gateway::prelude::*;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct DemoConfig {
    gateway: GatewaySettings,
}

#[test]
fn test_demo_config_builds() {
    let demo: DemoConfig = serde_yaml::from_str(include_str!("../demos/gateway_config.yaml")).unwrap();
    let config = demo.gateway.into_builder().unwrap().build().unwrap();

    assert!(matches!(config.endpoints, EndpointSource::Discovery { .. }));
    assert_eq!(config.client_id, "nila-gateway");
    assert_eq!(config.http_timeout, Duration::from_secs(5));
    assert!(matches!(config.propagation, PropagationMode::Headers));
    assert!(Gateway::new(config).is_ok());
}

#[test]
fn test_minting_settings_from_yaml() {
    let yaml = r#"
jwks_uri: "https://idp.test/jwks"
userinfo_uri: "https://idp.test/userinfo"
client_id: "gateway"
algorithms: ["RS256", "ES256"]
mint_tokens:
  issuer: "nila-gateway"
  algorithm: HS256
  signing_key:
    type: shared_secret
    value: "s3cr3t"
"#;
    let settings: GatewaySettings = serde_yaml::from_str(yaml).unwrap();
    let config = settings.into_builder().unwrap().build().unwrap();

    assert_eq!(config.validation.algorithms, vec![Algorithm::RS256, Algorithm::ES256]);
    match &config.propagation {
        PropagationMode::MintedToken(generator) => {
            assert_eq!(generator.token_ttl_seconds, 60);
            assert_eq!(generator.signing_key, SigningKeyConfig::SharedSecret("s3cr3t".to_string()));
        }
        PropagationMode::Headers => panic!("expected minted token propagation"),
    }

    let gateway = Gateway::new(config).unwrap();
    assert!(gateway.public_jwks().is_none());
}

#[test]
fn test_conflicting_endpoint_settings_are_rejected() {
    let yaml = r#"
discovery_uri: "https://idp.test/.well-known/openid-configuration"
jwks_uri: "https://idp.test/jwks"
client_id: "gateway"
"#;
    let settings: GatewaySettings = serde_yaml::from_str(yaml).unwrap();
    assert!(matches!(settings.into_builder(), Err(NilaGatewayError::InvalidConfiguration(_))));
}

#[test]
fn test_unknown_settings_are_rejected() {
    let yaml = "client_id: gateway\nissuer_url: https://idp.test\n";
    assert!(serde_yaml::from_str::<GatewaySettings>(yaml).is_err());
}

#[test]
fn test_unreadable_signing_key_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigBuilder::new()
        .discovery_uri("https://idp.test/.well-known/openid-configuration")
        .unwrap()
        .client_id("gateway")
        .mint_tokens(GeneratorConfig {
            issuer: "nila-gateway".to_string(),
            audience: None,
            algorithm: Algorithm::RS256,
            token_ttl_seconds: 60,
            signing_key: SigningKeyConfig::RsaPemFile(dir.path().join("missing.pem")),
        })
        .build()
        .unwrap();

    assert!(matches!(Gateway::new(config), Err(NilaGatewayError::InvalidConfiguration(_))));
}

#[test]
fn test_settings_from_environment() {
    std::env::set_var("OIDC_AUTHORITY", "https://idp.test/.well-known/openid-configuration");
    std::env::set_var("OIDC_CLIENT_ID", "env-gateway");
    std::env::set_var("GATEWAY_PRODUCT_NAME", "Acme");

    let config = ConfigBuilder::from_env().unwrap().build().unwrap();
    assert_eq!(config.client_id, "env-gateway");
    assert_eq!(config.product_name, "Acme");
    assert!(matches!(config.endpoints, EndpointSource::Discovery { .. }));
}
