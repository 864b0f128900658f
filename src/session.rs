//! Cookie-persisting HTTP session shared by every step of one login attempt.

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::{Error, Result, Stage};

/// Blocking HTTP session with a cookie jar.
///
/// Everything the identity provider and the application hand out as cookies
/// is kept here, so later requests are authenticated without attaching any
/// token by hand. Requests take `&mut self`: one login attempt owns its
/// session exclusively.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
}

impl Session {
    /// Creates a session backed by a fresh client with a cookie store.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(Error::ClientBuild)?;
        Ok(Self { client })
    }

    /// Wraps a caller-built client. It must have a cookie store enabled,
    /// otherwise the session does not survive between the two login phases.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client, for requests this crate does not model.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Issues a `GET` and buffers the response.
    pub fn get(&mut self, stage: Stage, url: &str, headers: HeaderMap) -> Result<Page> {
        let request = self.client.get(url).headers(headers);
        execute(stage, url, request)
    }

    /// Issues a `POST` with an optional JSON body.
    pub fn post_json<T: Serialize + ?Sized>(
        &mut self,
        stage: Stage,
        url: &str,
        headers: HeaderMap,
        body: Option<&T>,
    ) -> Result<Page> {
        let mut request = self.client.post(url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        execute(stage, url, request)
    }

    /// Issues a form-encoded `POST`. Field order is kept.
    pub fn post_form(&mut self, stage: Stage, url: &str, form: &[(&str, &str)]) -> Result<Page> {
        let request = self.client.post(url).form(form);
        execute(stage, url, request)
    }
}

fn execute(stage: Stage, url: &str, request: RequestBuilder) -> Result<Page> {
    let transport = |source| Error::Transport {
        stage,
        url: url.to_string(),
        source,
    };

    let response = request.send().map_err(transport)?;
    let status = response.status();
    let final_url = response.url().clone();
    let body = response.text().map_err(transport)?;
    trace!(%stage, url, status = status.as_u16(), bytes = body.len(), "response received");

    Ok(Page {
        stage,
        requested: url.to_string(),
        status,
        url: final_url,
        body,
    })
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Page {
    stage: Stage,
    requested: String,
    status: StatusCode,
    url: Url,
    body: String,
}

impl Page {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// URL the response came from, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    /// Turns a status of 400 or above into [`Error::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(Error::Status {
                stage: self.stage,
                url: self.requested,
                status: self.status.as_u16(),
                body: self.body,
            });
        }
        Ok(self)
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|source| Error::Decode {
            stage: self.stage,
            url: self.requested.clone(),
            source,
            body: self.body.clone(),
        })
    }
}

#[test]
fn test_error_for_status() -> anyhow::Result<()> {
    let url = Url::parse("https://app.example.com/")?;
    let page = |status| Page {
        stage: Stage::ApplicationEntry,
        requested: url.to_string(),
        status,
        url: url.clone(),
        body: "denied".to_string(),
    };

    page(StatusCode::FOUND).error_for_status()?;
    page(StatusCode::OK).error_for_status()?;

    match page(StatusCode::FORBIDDEN).error_for_status() {
        Err(Error::Status { status: 403, body, .. }) if body == "denied" => {}
        other => anyhow::bail!("Expected status error, got {:?}", other),
    }
    match page(StatusCode::SERVICE_UNAVAILABLE).error_for_status() {
        Err(Error::Status { status: 503, .. }) => {}
        other => anyhow::bail!("Expected status error, got {:?}", other),
    }

    Ok(())
}

#[test]
fn test_json_decode_error_keeps_body() -> anyhow::Result<()> {
    let page = Page {
        stage: Stage::InitialAuthData,
        requested: "https://idp.example.com/json/realms/root/authenticate".to_string(),
        status: StatusCode::OK,
        url: Url::parse("https://idp.example.com/json/realms/root/authenticate")?,
        body: "<html>maintenance</html>".to_string(),
    };

    match page.json::<serde_json::Value>() {
        Err(Error::Decode {
            stage: Stage::InitialAuthData,
            body,
            ..
        }) if body.contains("maintenance") => Ok(()),
        other => anyhow::bail!("Expected decode error, got {:?}", other),
    }
}
