//! Bearer token helpers.
//!
//! REST calls and the event channel both authenticate with the session's refresh token in an
//! `Authorization: Bearer <token>` header.

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("authorization header is not a bearer token")]
    Malformed,
}

/// Build the header value for `token`.
pub fn bearer_header(token: &str) -> String {
    format!("Bearer {token}")
}

/// Extract the token from an `Authorization` header value.
///
/// Returns `Ok(token)` for `Bearer <token>` (scheme matched case-insensitively), or an error
/// if the header is absent, uses another scheme, or carries an empty token.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::Missing)?.trim();
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Malformed);
    }

    let token = token.trim();
    if token.is_empty() {
        Err(AuthError::Malformed)
    } else {
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_token() {
        assert_eq!(parse_bearer(Some("Bearer abc123")), Ok("abc123"));
        assert_eq!(parse_bearer(Some("bearer  abc123 ")), Ok("abc123"));
        assert_eq!(parse_bearer(Some(&bearer_header("t-1"))), Ok("t-1"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(parse_bearer(None), Err(AuthError::Missing));
        assert_eq!(parse_bearer(Some("Basic abc")), Err(AuthError::Malformed));
        assert_eq!(parse_bearer(Some("Bearer")), Err(AuthError::Malformed));
        assert_eq!(parse_bearer(Some("Bearer   ")), Err(AuthError::Malformed));
    }
}
