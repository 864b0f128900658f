//! Challenge-response login against ForgeRock Access Management.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use tracing::debug;

use crate::challenge::{AuthChallenge, LoginResult};
use crate::credentials::Credentials;
use crate::error::{Error, Result, Stage};
use crate::session::Session;

/// Path of the authentication tree endpoint, relative to the base url.
pub const AUTHENTICATE_PATH: &str = "/json/realms/root/authenticate";

/// Value of the `Accept-API-Version` header sent to the authenticate endpoint.
pub const API_VERSION: &str = "protocol=1.0,resource=2.1";

const ACCEPT_API_VERSION: &str = "accept-api-version";

/// Headers for requests to the authenticate endpoint.
pub fn forgerock_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(ACCEPT_API_VERSION),
        HeaderValue::from_static(API_VERSION),
    );
    headers
}

/// Builds the authenticate endpoint url for a base url.
pub fn authenticate_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), AUTHENTICATE_PATH)
}

/// Handles the login to ForgeRock AM.
///
/// Fetches the base page for its cookies, asks the authenticate endpoint for
/// the callbacks of the tree, answers the name and password callbacks and
/// submits them once. On success the session carries the ForgeRock cookies.
pub fn authenticate(
    session: &mut Session,
    base_url: &str,
    credentials: &Credentials,
) -> Result<LoginResult> {
    session
        .get(Stage::InitialPage, base_url, HeaderMap::new())?
        .error_for_status()?;
    debug!(url = base_url, "fetched initial login page");

    let auth_url = authenticate_url(base_url);
    let mut challenge: AuthChallenge = session
        .post_json::<()>(Stage::InitialAuthData, &auth_url, forgerock_headers(), None)?
        .error_for_status()?
        .json()?;
    debug!(
        url = %auth_url,
        callbacks = ?challenge
            .callbacks()
            .iter()
            .map(|callback| callback.kind().as_str())
            .collect::<Vec<_>>(),
        "received authentication challenge"
    );

    challenge.fill_credentials(credentials)?;

    let page = session
        .post_json(
            Stage::SubmitCredentials,
            &auth_url,
            forgerock_headers(),
            Some(&challenge),
        )?
        .error_for_status()?;
    let result: LoginResult = page.json()?;
    if result.token_id().is_empty() {
        return Err(Error::EmptyToken {
            body: page.into_body(),
        });
    }
    debug!(
        realm = result.realm(),
        success_url = result.success_url(),
        "authenticated with ForgeRock"
    );

    Ok(result)
}

#[test]
fn test_authenticate_url() -> anyhow::Result<()> {
    let cases = [
        ("https://idp.example.com/am", "https://idp.example.com/am/json/realms/root/authenticate"),
        ("https://idp.example.com/am/", "https://idp.example.com/am/json/realms/root/authenticate"),
    ];

    for (base, expected) in cases {
        let url = authenticate_url(base);
        if url != expected {
            anyhow::bail!("authenticate_url({}) = {}, expected {}", base, url, expected);
        }
    }

    Ok(())
}

#[test]
fn test_forgerock_headers() -> anyhow::Result<()> {
    let headers = forgerock_headers();
    if headers.get("accept").and_then(|v| v.to_str().ok()) != Some("application/json") {
        anyhow::bail!("Unexpected Accept header: {:?}", headers.get("accept"));
    }
    if headers.get("Accept-API-Version").and_then(|v| v.to_str().ok()) != Some(API_VERSION) {
        anyhow::bail!(
            "Unexpected Accept-API-Version header: {:?}",
            headers.get("Accept-API-Version")
        );
    }
    Ok(())
}
