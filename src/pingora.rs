// src/pingora.rs

//! Glue for running the gateway inside a Pingora proxy.
//!
//! ```ignore
//! async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
//!     match self.gateway.authorize_request(session.req_header_mut(), &CancellationToken::new()).await {
//!         Ok(_) => Ok(false),
//!         Err(problem) => {
//!             respond_with_problem(session, &problem).await?;
//!             Ok(true)
//!         }
//!     }
//! }
//! ```

use crate::problem::{ProblemResponse, PROBLEM_CONTENT_TYPE};
use crate::propagation::RequestHeaders;
use bytes::Bytes;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::Session;

impl RequestHeaders for RequestHeader {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn contains_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), String> {
        self.insert_header(name.to_string(), value).map_err(|e| e.to_string())
    }

    fn remove_header(&mut self, name: &str) {
        RequestHeader::remove_header(self, name);
    }
}

/// Writes `problem` as the complete response of `session`.
pub async fn respond_with_problem(session: &mut Session, problem: &ProblemResponse) -> pingora_core::Result<()> {
    let body = Bytes::from(problem.to_body());

    let mut header = ResponseHeader::build(problem.status, Some(4))?;
    header.insert_header("Content-Type", PROBLEM_CONTENT_TYPE)?;
    header.insert_header("Content-Length", body.len().to_string())?;
    if let Some(challenge) = &problem.challenge {
        header.insert_header("WWW-Authenticate", challenge.as_str())?;
    }

    session.write_response_header(Box::new(header), false).await?;
    session.write_response_body(Some(body), true).await?;
    Ok(())
}
