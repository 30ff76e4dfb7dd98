use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::client::Client;
use crate::config::{
    CREDENTIALS_FILENAME, Credentials, CredentialsSource, configuration_directory, confirm,
    login_credentials, read_stored_credentials, resolve_credentials, write_credentials_file,
};
use crate::error::Error;
use crate::request::LoginRequest;

/// Writes the credentials file unless one exists and replacing it was refused.
pub(crate) fn store_credentials(
    dir: &Path,
    credentials: &Credentials,
    overwrite: bool,
) -> Result<Option<PathBuf>> {
    let path = dir.join(CREDENTIALS_FILENAME);
    if path.exists()
        && !overwrite
        && !confirm(&format!(
            "File {} already exists, overwrite it?",
            path.display()
        ))?
    {
        info!(path = %path.display(), "credentials file left unchanged");
        return Ok(None);
    }
    write_credentials_file(dir, credentials).map(Some)
}

impl Client {
    /// Checks or stores credentials; `Ok(false)` means the login did not succeed.
    pub fn login(&self, request: &LoginRequest) -> Result<bool> {
        let dir = request
            .configuration_file_directory
            .clone()
            .unwrap_or_else(configuration_directory);

        if request.check_credentials_valid {
            let source = CredentialsSource {
                username: request.username.clone(),
                password: request.password.clone(),
                credentials_file: Some(dir.join(CREDENTIALS_FILENAME)),
                prompt: false,
            };
            let credentials = match resolve_credentials(&source) {
                Ok(credentials) => credentials,
                Err(e)
                    if matches!(
                        e.downcast_ref::<Error>(),
                        Some(Error::CredentialsCannotBeNone(_))
                    ) =>
                {
                    warn!("no credentials found");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            let valid = self.check_credentials(&credentials)?;
            if valid {
                info!(username = %credentials.username, "valid credentials");
            } else {
                warn!(username = %credentials.username, "invalid credentials");
            }
            return Ok(valid);
        }

        if request.skip_if_user_logged_in {
            if let Some(stored) = read_stored_credentials(&dir)? {
                if self.check_credentials(&stored)? {
                    info!(username = %stored.username, "already logged in");
                    return Ok(true);
                }
                warn!("stored credentials are no longer valid");
            }
        }

        let credentials = login_credentials(request.username.clone(), request.password.clone())?;
        if !self.check_credentials(&credentials)? {
            error!(username = %credentials.username, "invalid username or password");
            return Ok(false);
        }
        match store_credentials(&dir, &credentials, request.overwrite_configuration_file)? {
            Some(path) => {
                info!(path = %path.display(), "credentials saved");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn credentials(password: &str) -> Credentials {
        Credentials {
            username: "jdoe".into(),
            password: password.into(),
        }
    }

    #[test]
    fn stores_and_overwrites_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_credentials(dir.path(), &credentials("first"), false)
            .unwrap()
            .unwrap();
        assert_eq!(path, dir.path().join(CREDENTIALS_FILENAME));

        assert_eq!(
            read_stored_credentials(dir.path()).unwrap(),
            Some(credentials("first"))
        );

        store_credentials(dir.path(), &credentials("third"), true).unwrap();
        assert_eq!(
            read_stored_credentials(dir.path()).unwrap(),
            Some(credentials("third"))
        );
    }
}
