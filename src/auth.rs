//! Username/password validation against the Copernicus Marine identity provider.

use anyhow::Result;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::client::Client;
use crate::config::Credentials;
use crate::error::Error;

const AUTH_REALM_URL: &str = "https://auth.marine.copernicus.eu/realms/MIS/protocol/openid-connect";
const AUTH_CLIENT_ID: &str = "toolbox";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// `Ok(true)` on success, `Ok(false)` when the identity provider rejects the
/// credentials, an error for anything else.
fn classify_auth_status(endpoint: &str, status: StatusCode) -> Result<bool, Error> {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            debug!(endpoint, %status, "credentials rejected");
            Ok(false)
        }
        status if status.is_success() => Ok(true),
        status => Err(Error::CouldNotConnectToAuthenticationSystem(format!(
            "{endpoint} endpoint answered HTTP {status}"
        ))),
    }
}

impl Client {
    /// Exchanges the credentials for a token and checks it on the userinfo endpoint.
    ///
    /// Returns `Ok(false)` for rejected credentials; transport failures are
    /// reported as [`Error::CouldNotConnectToAuthenticationSystem`].
    pub fn check_credentials(&self, credentials: &Credentials) -> Result<bool> {
        let token_url = format!("{AUTH_REALM_URL}/token");
        let form = [
            ("client_id", AUTH_CLIENT_ID),
            ("grant_type", "password"),
            ("scope", "openid"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];

        let resp = self
            .robust_request(|| self.http.post(&token_url).form(&form).send())
            .map_err(|e| Error::CouldNotConnectToAuthenticationSystem(format!("{e:#}")))?;

        if !classify_auth_status("token", resp.status())? {
            return Ok(false);
        }

        let token: TokenResponse = resp.json().map_err(|e| {
            Error::CouldNotConnectToAuthenticationSystem(format!("invalid token response: {e}"))
        })?;

        let userinfo_url = format!("{AUTH_REALM_URL}/userinfo");
        let resp = self
            .robust_request(|| {
                self.http
                    .get(&userinfo_url)
                    .bearer_auth(&token.access_token)
                    .send()
            })
            .map_err(|e| Error::CouldNotConnectToAuthenticationSystem(format!("{e:#}")))?;
        classify_auth_status("userinfo", resp.status()).map_err(Into::into)
    }

    /// [`Client::check_credentials`], turning a rejection into an error.
    pub fn ensure_valid_credentials(&self, credentials: &Credentials) -> Result<()> {
        if self.check_credentials(credentials)? {
            Ok(())
        } else {
            Err(Error::InvalidUsernameOrPassword(format!(
                "the credentials of user '{}' were rejected; check them on https://data.marine.copernicus.eu/register or run `copernicusmarine login`",
                credentials.username
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejected_credentials_are_not_errors() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
        ] {
            assert_eq!(classify_auth_status("token", status), Ok(false));
            assert_eq!(classify_auth_status("userinfo", status), Ok(false));
        }
        assert_eq!(classify_auth_status("token", StatusCode::OK), Ok(true));
    }

    #[test]
    fn server_failures_are_connection_errors() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::NOT_FOUND,
        ] {
            let err = classify_auth_status("userinfo", status).unwrap_err();
            assert_eq!(err.kind(), "CouldNotConnectToAuthenticationSystem");
            assert!(err.to_string().contains("userinfo"));
        }
    }
}
