use std::fmt;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::authenticate::{authenticate, authenticate_url};
use crate::challenge::LoginResult;
use crate::credentials::Credentials;
use crate::error::{Error, Result, Stage};
use crate::saml::complete_sso;
use crate::session::{Page, Session};

/// ForgeRock client used to login to ForgeRock and any service providers
/// using ForgeRock as their identity provider.
#[derive(Debug, Clone)]
pub struct ForgeRockClient {
    base_url: String,
}

impl ForgeRockClient {
    /// Creates a new ForgeRock client with the given base url.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(Error::MissingBaseUrl);
        }

        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The authenticate endpoint `login` posts to.
    pub fn auth_url(&self) -> String {
        authenticate_url(&self.base_url)
    }

    /// Logs in to ForgeRock Access Management and then to the application
    /// behind `app_url`.
    ///
    /// The returned session can issue further requests to systems using
    /// ForgeRock as their identity provider. Nothing is sent when the
    /// credentials are incomplete.
    pub fn login(&self, app_url: &str, credentials: &Credentials) -> Result<AuthenticatedSession> {
        credentials.validate()?;
        self.login_with(Session::new()?, app_url, credentials)
    }

    /// Same as [`login`](Self::login), on a caller-built session.
    pub fn login_with(
        &self,
        mut session: Session,
        app_url: &str,
        credentials: &Credentials,
    ) -> Result<AuthenticatedSession> {
        credentials.validate()?;

        let login = authenticate(&mut session, &self.base_url, credentials)
            .inspect_err(|err| warn!(error = %err, "ForgeRock authentication failed"))?;
        complete_sso(&mut session, app_url)
            .inspect_err(|err| warn!(error = %err, app_url, "SAML exchange failed"))?;

        info!(
            username = credentials.username(),
            app_url, "logged in to application"
        );
        Ok(AuthenticatedSession { session, login })
    }
}

/// A session authenticated against both ForgeRock and the application.
pub struct AuthenticatedSession {
    session: Session,
    login: LoginResult,
}

impl AuthenticatedSession {
    /// Result of the ForgeRock authentication, including the token id.
    pub fn login_result(&self) -> &LoginResult {
        &self.login
    }

    /// The underlying session, for requests needing their own headers.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// `GET` with the authenticated cookies. Statuses of 400 and above are
    /// errors.
    pub fn get(&mut self, url: &str) -> Result<Page> {
        self.session
            .get(Stage::FollowUp, url, HeaderMap::new())?
            .error_for_status()
    }

    /// `GET` asking for and decoding JSON.
    pub fn get_json<T: DeserializeOwned>(&mut self, url: &str) -> Result<T> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.session
            .get(Stage::FollowUp, url, headers)?
            .error_for_status()?
            .json()
    }
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

#[test]
fn test_new_requires_base_url() -> anyhow::Result<()> {
    match ForgeRockClient::new("") {
        Err(Error::MissingBaseUrl) => {}
        other => anyhow::bail!("Expected MissingBaseUrl, got {:?}", other),
    }

    let client = ForgeRockClient::new("https://idp.example.com/am")?;
    if client.auth_url() != "https://idp.example.com/am/json/realms/root/authenticate" {
        anyhow::bail!("Unexpected auth url: {}", client.auth_url());
    }

    Ok(())
}

#[test]
fn test_login_rejects_empty_credentials_without_io() -> anyhow::Result<()> {
    // Nothing listens on port 9, any request would fail with a transport error.
    let client = ForgeRockClient::new("http://127.0.0.1:9")?;

    for credentials in [Credentials::new("", "secret"), Credentials::new("alice", "")] {
        match client.login("http://127.0.0.1:9/app", &credentials) {
            Err(Error::MissingCredentials) => {}
            other => anyhow::bail!("Expected MissingCredentials, got {:?}", other),
        }
    }

    Ok(())
}
