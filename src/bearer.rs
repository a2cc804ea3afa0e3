// src/bearer.rs

use crate::error::NilaGatewayError;

/// The credential carried by one `Authorization` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BearerCredential<'a> {
    pub scheme: &'a str,
    pub token: &'a str,
}

/// Splits an `Authorization` header value into `<scheme> <token>`.
///
/// The token must be one or more non-whitespace characters separated from the
/// scheme by a single space. The scheme itself is not checked here.
pub fn parse_authorization(header_value: &str) -> Result<BearerCredential<'_>, NilaGatewayError> {
    let value = header_value.trim();
    if value.is_empty() {
        return Err(NilaGatewayError::HeaderMissing);
    }

    let (scheme, token) = value.split_once(' ').ok_or(NilaGatewayError::HeaderMalformed)?;
    if scheme.is_empty() || token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(NilaGatewayError::HeaderMalformed);
    }

    Ok(BearerCredential { scheme, token })
}

/// Extracts the raw bearer token from an `Authorization` header value.
///
/// The scheme keyword is matched case-insensitively; the token is returned
/// exactly as sent.
pub fn extract_bearer_token(header_value: &str) -> Result<&str, NilaGatewayError> {
    let credential = parse_authorization(header_value)?;
    if !credential.scheme.eq_ignore_ascii_case("bearer") {
        return Err(NilaGatewayError::SchemeUnsupported(credential.scheme.to_string()));
    }
    Ok(credential.token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_unmodified() {
        assert_eq!(extract_bearer_token("Bearer abc.def.ghi"), Ok("abc.def.ghi"));
        assert_eq!(extract_bearer_token("bearer AbC-_=.x"), Ok("AbC-_=.x"));
        assert_eq!(extract_bearer_token("BEARER t"), Ok("t"));
        assert_eq!(extract_bearer_token("  Bearer padded  "), Ok("padded"));
    }

    #[test]
    fn empty_values_are_missing() {
        assert_eq!(extract_bearer_token(""), Err(NilaGatewayError::HeaderMissing));
        assert_eq!(extract_bearer_token(" \t "), Err(NilaGatewayError::HeaderMissing));
    }

    #[test]
    fn grammar_violations_are_malformed() {
        for value in ["Bearer", "Bearertoken", "Bearer  two-spaces", "Bearer a b", "Bearer a\tb"] {
            assert_eq!(extract_bearer_token(value), Err(NilaGatewayError::HeaderMalformed), "{value:?}");
        }
    }

    #[test]
    fn other_schemes_are_unsupported() {
        assert_eq!(
            extract_bearer_token("Basic dXNlcjpwYXNz"),
            Err(NilaGatewayError::SchemeUnsupported("Basic".to_string()))
        );
    }
}
