// src/propagation.rs

use crate::error::NilaGatewayError;
use crate::generator::TokenMinter;
use crate::identity::Identity;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use tracing::debug;

pub const AUTHENTICATED_USER: &str = "X-Authenticated-User";
pub const AUTHENTICATED_GROUPS: &str = "X-Authenticated-Groups";
pub const IS_STAFF: &str = "X-Is-Staff";
pub const SUPERUSER: &str = "X-Superuser";

/// Read and write access to the headers of the request being forwarded.
///
/// Implemented by whatever request type the hosting proxy uses.
pub trait RequestHeaders {
    /// The value of `name`, or `None` if it is absent or not visible ASCII.
    fn header(&self, name: &str) -> Option<&str>;
    fn contains_header(&self, name: &str) -> bool;
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), String>;
    fn remove_header(&mut self, name: &str);
}

impl RequestHeaders for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }

    fn contains_header(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), String> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
        let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
        self.insert(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &str) {
        self.remove(name);
    }
}

/// The names of the identity headers forwarded upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNames {
    pub product_user: String,
    pub product_groups: String,
}

impl HeaderNames {
    /// Builds `X-<Product>-User` and `X-<Product>-Groups`.
    pub fn for_product(product: &str) -> Self {
        Self {
            product_user: format!("X-{product}-User"),
            product_groups: format!("X-{product}-Groups"),
        }
    }

    /// Every header that carries identity, product-specific aliases first.
    pub fn all(&self) -> [&str; 6] {
        [
            self.product_user.as_str(),
            AUTHENTICATED_USER,
            self.product_groups.as_str(),
            AUTHENTICATED_GROUPS,
            IS_STAFF,
            SUPERUSER,
        ]
    }
}

/// Writes a verified identity onto the outgoing request.
#[derive(Debug, Clone)]
pub enum Propagator {
    Headers(HeaderNames),
    MintedToken { names: HeaderNames, minter: TokenMinter },
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl Propagator {
    /// Applies `identity` to `headers`.
    ///
    /// Client-supplied identity headers never survive: they are overwritten in
    /// header mode and removed in token mode. On failure `headers` is left as it
    /// was, so no request goes upstream with a partial identity.
    pub fn apply<H: RequestHeaders + ?Sized>(&self, identity: &Identity, headers: &mut H) -> Result<(), NilaGatewayError> {
        match self {
            Propagator::Headers(names) => {
                let groups = identity.groups.join(",");
                let staff = flag(identity.staff);
                let values = [
                    (names.product_user.as_str(), identity.username.as_str()),
                    (AUTHENTICATED_USER, identity.username.as_str()),
                    (names.product_groups.as_str(), groups.as_str()),
                    (AUTHENTICATED_GROUPS, groups.as_str()),
                    (IS_STAFF, staff),
                    (SUPERUSER, staff),
                ];
                set_all(headers, &values)?;
                debug!(user = %identity.username, "Propagated identity headers");
            }
            Propagator::MintedToken { names, minter } => {
                let token = minter.mint(identity)?;
                let authorization = format!("Bearer {token}");
                set_all(headers, &[(AUTHORIZATION.as_str(), authorization.as_str())])?;
                for name in names.all() {
                    headers.remove_header(name);
                }
                debug!(user = %identity.username, "Propagated minted upstream token");
            }
        }
        Ok(())
    }
}

/// Sets every header or none of them.
fn set_all<H: RequestHeaders + ?Sized>(headers: &mut H, values: &[(&str, &str)]) -> Result<(), NilaGatewayError> {
    for (name, value) in values {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NilaGatewayError::PropagationFailed(format!("header name '{name}': {e}")))?;
        HeaderValue::from_str(value)
            .map_err(|e| NilaGatewayError::PropagationFailed(format!("header '{name}': {e}")))?;
    }

    let previous: Vec<Option<String>> = values
        .iter()
        .map(|(name, _)| headers.header(name).map(str::to_string))
        .collect();

    for (applied, (name, value)) in values.iter().enumerate() {
        if let Err(e) = headers.set_header(name, value) {
            restore(headers, &values[..applied], &previous[..applied]);
            return Err(NilaGatewayError::PropagationFailed(format!("header '{name}': {e}")));
        }
    }
    Ok(())
}

fn restore<H: RequestHeaders + ?Sized>(headers: &mut H, values: &[(&str, &str)], previous: &[Option<String>]) {
    for ((name, _), old) in values.iter().zip(previous) {
        match old {
            Some(old) => {
                // The value was read from these headers, so writing it back succeeds.
                let _ = headers.set_header(name, old);
            }
            None => headers.remove_header(name),
        }
    }
}
