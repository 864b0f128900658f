//! SAML POST-binding completion against the target application.

use std::fmt;

use reqwest::header::HeaderMap;
use reqwest::Url;
use tracing::debug;

use crate::error::{Error, Result, Stage};
use crate::html::Form;
use crate::session::Session;

/// Name of the form field carrying the assertion.
pub const SAML_RESPONSE: &str = "SAMLResponse";

/// Name of the form field carrying the relay state.
pub const RELAY_STATE: &str = "RelayState";

/// Response embedded in a html form used for the SAML exchange.
///
/// Extracted from one page, posted once, then dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct SsoRedirect {
    action: String,
    saml_response: String,
    relay_state: String,
}

impl SsoRedirect {
    /// Reads the first form of `html`. The action, the SAMLResponse and the
    /// RelayState must all be present and non-empty.
    pub fn parse(html: &str) -> Result<Self> {
        let form = Form::first(html).ok_or(Error::MalformedSamlForm("a form element"))?;

        let action = non_empty(form.attribute("action"), "the form action")?;
        let saml_response = non_empty(form.input_value(SAML_RESPONSE), "the SAMLResponse input")?;
        let relay_state = non_empty(form.input_value(RELAY_STATE), "the RelayState input")?;

        Ok(Self {
            action,
            saml_response,
            relay_state,
        })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Resolves the action against the URL of the page it came from.
    pub fn action_url(&self, base: &Url) -> Result<Url> {
        base.join(&self.action).map_err(|err| Error::InvalidAction {
            action: self.action.clone(),
            reason: err.to_string(),
        })
    }

    /// Form body for the assertion consumer service.
    pub fn form_data(&self) -> [(&'static str, &str); 2] {
        [
            (SAML_RESPONSE, self.saml_response.as_str()),
            (RELAY_STATE, self.relay_state.as_str()),
        ]
    }
}

impl fmt::Debug for SsoRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoRedirect")
            .field("action", &self.action)
            .field("saml_response", &format_args!("<{} bytes>", self.saml_response.len()))
            .field("relay_state", &self.relay_state)
            .finish()
    }
}

fn non_empty(value: Option<&str>, what: &'static str) -> Result<String> {
    match value {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(Error::MalformedSamlForm(what)),
    }
}

/// Logs in to a ForgeRock login protected application.
///
/// The session must already carry the identity provider's cookies. The
/// application answers with an auto-submitting POST-binding page, whose
/// SAMLResponse and RelayState are posted to the form action.
pub fn complete_sso(session: &mut Session, app_url: &str) -> Result<()> {
    let page = session
        .get(Stage::ApplicationEntry, app_url, HeaderMap::new())?
        .error_for_status()?;
    debug!(url = %page.url(), "fetched application entry point");

    if !page.body().contains(SAML_RESPONSE) {
        return Err(Error::MissingSamlForm {
            body: page.into_body(),
        });
    }

    let redirect = SsoRedirect::parse(page.body())?;
    let action = redirect.action_url(page.url())?;
    debug!(action = %action, "extracted SAML redirect form");

    session
        .post_form(Stage::AssertionConsumer, action.as_str(), &redirect.form_data())?
        .error_for_status()?;
    debug!(action = %action, "posted SAML response");

    Ok(())
}

#[cfg(test)]
const POST_BINDING_PAGE: &str = r##"<!DOCTYPE html>
<html>
<head><title>Submit This Form</title></head>
<body onload="document.forms[0].submit()">
<noscript><p><strong>Note:</strong> Since your browser does not support JavaScript,
you must press the button below once to proceed.</p></noscript>
<form method="post" action="/saml/SSO/alias/app">
<input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNlIC8+" />
<input type="hidden" name="RelayState" value="https&#x3a;&#x2f;&#x2f;app.example.com&#x2f;home" />
<noscript><input type="submit" value="Submit" /></noscript>
</form>
</body>
</html>"##;

#[test]
fn test_parse_post_binding_page() -> anyhow::Result<()> {
    let redirect = SsoRedirect::parse(POST_BINDING_PAGE)?;

    if redirect.action() != "/saml/SSO/alias/app" {
        anyhow::bail!("Unexpected action: {}", redirect.action());
    }
    let expected = [
        (SAML_RESPONSE, "PHNhbWxwOlJlc3BvbnNlIC8+"),
        (RELAY_STATE, "https://app.example.com/home"),
    ];
    if redirect.form_data() != expected {
        anyhow::bail!("Unexpected form data: {:?}", redirect.form_data());
    }

    Ok(())
}

#[test]
fn test_relative_action_resolves_against_page() -> anyhow::Result<()> {
    let redirect = SsoRedirect::parse(POST_BINDING_PAGE)?;
    let base = Url::parse("https://app.example.com/login?next=/home")?;

    let action = redirect.action_url(&base)?;
    if action.as_str() != "https://app.example.com/saml/SSO/alias/app" {
        anyhow::bail!("Unexpected action url: {}", action);
    }

    Ok(())
}

#[test]
fn test_parse_rejects_incomplete_forms() -> anyhow::Result<()> {
    let cases = [
        (
            r#"<form>
                <input name="SAMLResponse" value="abc"><input name="RelayState" value="r">
            </form>"#,
            "the form action",
        ),
        (
            r#"<form action="/acs">
                <input name="SAMLResponse" value=""><input name="RelayState" value="r">
            </form>"#,
            "the SAMLResponse input",
        ),
        (
            r#"<form action="/acs"><input name="SAMLResponse" value="abc"></form>"#,
            "the RelayState input",
        ),
        (r#"<p>SAMLResponse</p>"#, "a form element"),
    ];

    for (html, what) in cases {
        match SsoRedirect::parse(html) {
            Err(Error::MalformedSamlForm(missing)) if missing == what => {}
            other => anyhow::bail!("Expected missing {}, got {:?}", what, other),
        }
    }

    Ok(())
}

#[test]
fn test_debug_hides_assertion() -> anyhow::Result<()> {
    let redirect = SsoRedirect::parse(POST_BINDING_PAGE)?;
    if format!("{:?}", redirect).contains("PHNhbWxwOlJlc3BvbnNlIC8+") {
        anyhow::bail!("Assertion leaked in debug output");
    }
    Ok(())
}
