//! Custom validation functions for configuration.

use regex::Regex;
use validator::ValidationError;

fn matches(pattern: &str, value: &str) -> Result<bool, ValidationError> {
    let re = Regex::new(pattern).map_err(|_| ValidationError::new("invalid_regex"))?;
    Ok(re.is_match(value))
}

/// Validate bus role.
pub fn validate_role(role: &str) -> Result<(), ValidationError> {
    if matches("^(server|client|network)$", role)? {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_role"))
    }
}

/// Validate a `host:port` or `:port` address.
pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    let port_ok = address
        .rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .is_some();
    if port_ok && matches(r"^(\[[0-9A-Fa-f:]+\]|[A-Za-z0-9.\-]*):[0-9]{1,5}$", address)? {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_address"))
    }
}

/// Validate an endpoint path (`/` followed by path characters).
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    if matches(r"^/[A-Za-z0-9_\-./]*$", path)? {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_path"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses() {
        assert!(validate_address(":2010").is_ok());
        assert!(validate_address("127.0.0.1:0").is_ok());
        assert!(validate_address("bus.local:8080").is_ok());
        assert!(validate_address("[::1]:2010").is_ok());
        assert!(validate_address("127.0.0.1").is_err());
        assert!(validate_address("host:99999").is_err());
    }

    #[test]
    fn paths() {
        assert!(validate_path("/_server_bus_").is_ok());
        assert!(validate_path("/a/b-c.d").is_ok());
        assert!(validate_path("_server_bus_").is_err());
        assert!(validate_path("/with space").is_err());
    }

    #[test]
    fn roles() {
        assert!(validate_role("network").is_ok());
        assert!(validate_role("Network").is_err());
        assert!(validate_role("broker").is_err());
    }
}
