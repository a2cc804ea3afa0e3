// src/lib.rs

pub mod bearer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod generator;
pub(crate) mod http;
pub mod identity;
pub mod jwks;
#[cfg(feature = "pingora-integration")]
pub mod pingora;
pub mod problem;
pub mod propagation;
pub mod request_id;
pub mod validator;

/// The public prelude for the `nila-oidc-gateway` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::config::{Config, ConfigBuilder, PropagationMode};
    pub use crate::error::NilaGatewayError;
    pub use crate::gateway::Gateway;
    pub use crate::generator::{GeneratorConfig, SigningKeyConfig};
    pub use crate::identity::Identity;
    pub use crate::jwks::store::{FileKeySetStore, KeySetStore};
    pub use crate::jwks::KeySetCache;
    #[cfg(feature = "pingora-integration")]
    pub use crate::pingora::respond_with_problem;
    pub use crate::problem::{ProblemResponse, PROBLEM_CONTENT_TYPE};
    pub use crate::propagation::RequestHeaders;
    pub use crate::validator::{TokenValidator, VerifiedToken};
    pub use jsonwebtoken::Algorithm;
    pub use tokio_util::sync::CancellationToken;
}
