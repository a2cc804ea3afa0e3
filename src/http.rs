// src/http.rs

use crate::error::NilaGatewayError;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::RequestBuilder;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds the client shared by all identity provider calls.
///
/// Redirects are not followed, so a provider cannot bounce the gateway to an
/// arbitrary host.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, NilaGatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("nila-oidc-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| NilaGatewayError::InvalidConfiguration(format!("HTTP client: {e}")))
}

/// Why an outbound call produced no usable body.
#[derive(Debug)]
pub(crate) enum FetchError {
    Cancelled,
    /// Transport failure, timeout, or a non-success status.
    Unreachable(String),
}

impl FetchError {
    /// Converts into the pipeline error, using `unreachable` for transport failures.
    pub(crate) fn into_gateway_error(self, unreachable: fn(String) -> NilaGatewayError) -> NilaGatewayError {
        match self {
            FetchError::Cancelled => NilaGatewayError::Cancelled,
            FetchError::Unreachable(detail) => unreachable(detail),
        }
    }
}

/// Sends `request` and reads the full body, aborting as soon as `cancel` fires.
pub(crate) async fn fetch(request: RequestBuilder, cancel: &CancellationToken) -> Result<(HeaderMap, Bytes), FetchError> {
    let exchange = async {
        let response = request.send().await.map_err(|e| FetchError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("unexpected status {status}")));
        }
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| FetchError::Unreachable(e.to_string()))?;
        Ok((headers, body))
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = exchange => result,
    }
}
