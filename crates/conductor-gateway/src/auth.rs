use conductor_core::config::GatewayConfig;

/// Check a bearer token against the configured one.
///
/// With no token configured every caller is accepted.
pub fn validate_bearer(config: &GatewayConfig, bearer: Option<&str>) -> bool {
    match (&config.token, bearer) {
        (None, _) => true,
        (Some(expected), Some(given)) => expected == given,
        (Some(_), None) => false,
    }
}

/// Pull the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_from_header(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(token: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            bind: "127.0.0.1:7420".to_string(),
            token: token.map(|s| s.to_string()),
        }
    }

    #[test]
    fn no_token_configured_allows_anyone() {
        assert!(validate_bearer(&gateway(None), None));
        assert!(validate_bearer(&gateway(None), Some("whatever")));
    }

    #[test]
    fn token_must_match() {
        let config = gateway(Some("s3cret"));
        assert!(validate_bearer(&config, Some("s3cret")));
        assert!(!validate_bearer(&config, Some("wrong")));
        assert!(!validate_bearer(&config, None));
    }

    #[test]
    fn header_parsing() {
        assert_eq!(bearer_from_header("Bearer abc"), Some("abc"));
        assert_eq!(bearer_from_header("Basic abc"), None);
    }
}
