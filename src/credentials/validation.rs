use super::{GrantType, OAuthOutgoingConnection};
use crate::error::{RegistryError, Result};
use url::Url;

const MAX_NAME_CHARS: usize = 64;
const MAX_CLIENT_ID_CHARS: usize = 255;
const MAX_SECRET_CHARS: usize = 255;

/// Checks a record before it is written.
///
/// Runs against plaintext secrets, so it must be called before sealing.
/// Does not look at `id`; id presence rules belong to save/update.
pub fn validate(conn: &OAuthOutgoingConnection) -> Result<()> {
    check_length("name", &conn.name, MAX_NAME_CHARS)?;
    check_length("client_id", &conn.client_id, MAX_CLIENT_ID_CHARS)?;
    check_length("client_secret", &conn.client_secret, MAX_SECRET_CHARS)?;

    validate_token_url(&conn.oauth_token_url)?;

    if conn.audiences.is_empty() {
        return Err(RegistryError::invalid(
            "audiences",
            "at least one audience is required",
        ));
    }
    if let Some(pos) = conn.audiences.iter().position(|a| a.trim().is_empty()) {
        return Err(RegistryError::invalid(
            "audiences",
            format!("audience at position {} is blank", pos),
        ));
    }

    if conn.grant_type == GrantType::Password {
        let username = conn.credentials_username.as_deref().unwrap_or("");
        let password = conn.credentials_password.as_deref().unwrap_or("");
        if username.is_empty() {
            return Err(RegistryError::invalid(
                "credentials_username",
                "required for the password grant",
            ));
        }
        check_length("credentials_password", password, MAX_SECRET_CHARS)?;
    }

    Ok(())
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len == 0 {
        return Err(RegistryError::invalid(field, "must not be empty"));
    }
    if len > max {
        return Err(RegistryError::invalid(
            field,
            format!("must be at most {} characters, got {}", max, len),
        ));
    }
    Ok(())
}

fn validate_token_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| RegistryError::invalid("oauth_token_url", format!("not an absolute URL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(RegistryError::invalid(
                "oauth_token_url",
                format!("unsupported scheme '{}'", other),
            ))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(RegistryError::invalid("oauth_token_url", "missing host"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn valid() -> OAuthOutgoingConnection {
        OAuthOutgoingConnection::new(
            "svc1",
            "abc",
            "s3cr3t",
            "https://idp.example/token",
            GrantType::ClientCredentials,
            vec!["aud1".to_string()],
        )
    }

    fn field_of(conn: &OAuthOutgoingConnection) -> &'static str {
        match validate(conn) {
            Err(RegistryError::InvalidInput { field, .. }) => field,
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_record_passes() {
        assert!(validate(&valid()).is_ok());
    }

    #[test]
    fn test_required_fields() {
        let mut conn = valid();
        conn.name.clear();
        assert_eq!(field_of(&conn), "name");

        let mut conn = valid();
        conn.client_id.clear();
        assert_eq!(field_of(&conn), "client_id");

        let mut conn = valid();
        conn.client_secret.clear();
        assert_eq!(field_of(&conn), "client_secret");
    }

    #[test]
    fn test_length_limits() {
        let mut conn = valid();
        conn.name = "n".repeat(65);
        assert_eq!(field_of(&conn), "name");

        conn.name = "n".repeat(64);
        assert!(validate(&conn).is_ok());

        conn.client_secret = "s".repeat(256);
        assert_eq!(field_of(&conn), "client_secret");
    }

    #[test]
    fn test_token_url_must_be_absolute_http() {
        for bad in ["", "/token", "idp.example/token", "ftp://idp.example/token", "mailto:a@b"] {
            let mut conn = valid();
            conn.oauth_token_url = bad.to_string();
            assert_eq!(field_of(&conn), "oauth_token_url", "accepted {:?}", bad);
        }

        let mut conn = valid();
        conn.oauth_token_url = "http://localhost:8080/oauth/token".to_string();
        assert!(validate(&conn).is_ok());
    }

    #[test]
    fn test_audiences() {
        let mut conn = valid();
        conn.audiences.clear();
        let err = validate(&conn).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        conn.audiences = vec!["aud1".to_string(), "  ".to_string()];
        assert_eq!(field_of(&conn), "audiences");
    }

    #[test]
    fn test_password_grant_needs_resource_owner() {
        let mut conn = valid();
        conn.grant_type = GrantType::Password;
        assert_eq!(field_of(&conn), "credentials_username");

        conn.credentials_username = Some("svc-user".to_string());
        assert_eq!(field_of(&conn), "credentials_password");

        conn.credentials_password = Some("hunter2".to_string());
        assert!(validate(&conn).is_ok());
    }
}
