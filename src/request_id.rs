// src/request_id.rs

use crate::propagation::RequestHeaders;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Returns the request id, generating and setting one if the client sent none.
///
/// A generated id that cannot be written is still returned so failures can be
/// correlated in the logs.
pub fn ensure_request_id<H: RequestHeaders + ?Sized>(headers: &mut H) -> String {
    if let Some(existing) = headers.header(REQUEST_ID_HEADER).map(str::trim).filter(|id| !id.is_empty()) {
        return existing.to_string();
    }

    let generated = Uuid::new_v4().to_string();
    if let Err(e) = headers.set_header(REQUEST_ID_HEADER, &generated) {
        tracing::warn!("Could not set {}: {}", REQUEST_ID_HEADER, e);
    }
    generated
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    #[test]
    fn reuses_inbound_id() {
        let mut headers = HeaderMap::new();
        headers.set_header("x-request-id", "abc-123").unwrap();
        assert_eq!(ensure_request_id(&mut headers), "abc-123");
    }

    #[test]
    fn generates_missing_id() {
        let mut headers = HeaderMap::new();
        let id = ensure_request_id(&mut headers);
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(headers.header(REQUEST_ID_HEADER), Some(id.as_str()));
    }
}
