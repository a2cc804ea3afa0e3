// demos/nila_gateway_proxy.rs
//
// cargo run --example nila_gateway_proxy --features pingora-integration -- demos/gateway_config.yaml

use async_trait::async_trait;
use nila_oidc_gateway::config::GatewaySettings;
use nila_oidc_gateway::prelude::*;
use pingora_core::server::Server;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::{Error, ErrorType, Result};
use pingora_proxy::{ProxyHttp, Session};
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ProxyAppConfig {
    listen_addr: String,
    upstream_addr: String,
    #[serde(default)]
    upstream_tls: bool,
    key_store_dir: Option<String>,
    gateway: GatewaySettings,
}

struct GatewayService {
    gateway: Gateway,
    shutdown: CancellationToken,
    upstream_addr: String,
    upstream_tls: bool,
    upstream_sni: String,
}

#[async_trait]
impl ProxyHttp for GatewayService {
    type CTX = ();
    fn new_ctx(&self) -> Self::CTX {}

    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        let cancel = self.shutdown.child_token();
        match self.gateway.authorize_request(session.req_header_mut(), &cancel).await {
            Ok(identity) => {
                info!(user = %identity.username, "Forwarding authenticated request");
                Ok(false)
            }
            Err(problem) => {
                respond_with_problem(session, &problem).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        Ok(Box::new(HttpPeer::new(
            self.upstream_addr.as_str(),
            self.upstream_tls,
            self.upstream_sni.clone(),
        )))
    }
}

fn startup_error(context: String) -> Box<Error> {
    let mut err = Error::new(ErrorType::InternalError);
    err.set_context(context);
    err
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/gateway_config.yaml".to_string());
    let config_str = fs::read_to_string(&config_path)
        .map_err(|e| startup_error(format!("Failed to read config file {config_path}: {e}")))?;
    let app_config: ProxyAppConfig = serde_yaml::from_str(&config_str)
        .map_err(|e| startup_error(format!("Failed to parse YAML config from {config_path}: {e}")))?;

    let gateway_config = app_config
        .gateway
        .into_builder()
        .and_then(|builder| builder.build())
        .map_err(|e| startup_error(format!("Gateway configuration error: {e}")))?;
    let gateway = match &app_config.key_store_dir {
        Some(dir) => Gateway::with_key_set_store(gateway_config, Arc::new(FileKeySetStore::new(dir))),
        None => Gateway::new(gateway_config),
    }
    .map_err(|e| startup_error(format!("Gateway initialization error: {e}")))?;

    // Runs the background key refresh; Pingora brings its own runtimes for the proxy itself.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| startup_error(format!("Failed to create Tokio runtime: {e}")))?;
    let shutdown = CancellationToken::new();
    runtime
        .block_on(gateway.spawn_key_refresh(shutdown.clone()))
        .map_err(|e| startup_error(format!("Key set refresh could not start: {e}")))?;

    let upstream_sni = app_config
        .upstream_addr
        .split(':')
        .next()
        .unwrap_or(&app_config.upstream_addr)
        .to_string();
    let service = GatewayService {
        gateway,
        shutdown,
        upstream_addr: app_config.upstream_addr.clone(),
        upstream_tls: app_config.upstream_tls,
        upstream_sni,
    };

    let mut server = Server::new(None)?;
    server.bootstrap();

    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, service);
    proxy_service.add_tcp(&app_config.listen_addr);
    info!("Nila gateway listening on {}", app_config.listen_addr);

    server.add_service(proxy_service);
    server.run_forever();
}
