//! Error types for the login flow.

use std::fmt;

use thiserror::Error;

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Step of the login flow an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `GET {base_url}`.
    InitialPage,
    /// First `POST` to the authenticate endpoint.
    InitialAuthData,
    /// Resubmission of the filled challenge.
    SubmitCredentials,
    /// `GET {app_url}`.
    ApplicationEntry,
    /// `POST` of the SAML response to the assertion consumer service.
    AssertionConsumer,
    /// Requests issued with an already authenticated session.
    FollowUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InitialPage => "initial page unreachable",
            Self::InitialAuthData => "failed to get initial auth data",
            Self::SubmitCredentials => "failed to login",
            Self::ApplicationEntry => "application url unreachable",
            Self::AssertionConsumer => "error completing SAML exchange",
            Self::FollowUp => "request with authenticated session failed",
        })
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input detected before any request was sent.
    Configuration,
    /// The network round trip itself failed.
    Transport,
    /// The server answered with something the driver does not understand.
    Protocol,
    /// The identity provider rejected the credentials.
    Authentication,
    /// The target application or its assertion consumer failed.
    Downstream,
}

/// Every way a login attempt can fail.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing ForgeRock base url")]
    MissingBaseUrl,

    #[error("missing username or password for ForgeRock login")]
    MissingCredentials,

    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("{stage} \"{url}\": {source}")]
    Transport {
        stage: Stage,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{stage} \"{url}\": status {status}: {body}")]
    Status {
        stage: Stage,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{stage} \"{url}\": invalid json response: {source}: {body}")]
    Decode {
        stage: Stage,
        url: String,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("unexpected auth data callback type: {0}")]
    UnsupportedCallback(String),

    #[error("failed to find {missing} in auth data, got callbacks [{}]", .seen.join(", "))]
    MissingCallback {
        missing: &'static str,
        seen: Vec<String>,
    },

    #[error("callback {0} has no input slot to fill")]
    EmptyCallbackInput(String),

    #[error("failed to login, tokenId is empty: {body}")]
    EmptyToken { body: String },

    #[error("expected response to contain SAMLResponse form: {body}")]
    MissingSamlForm { body: String },

    #[error("SAML redirect form is missing {0}")]
    MalformedSamlForm(&'static str),

    #[error("invalid SAML form action \"{action}\": {reason}")]
    InvalidAction { action: String, reason: String },
}

impl Error {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingBaseUrl | Self::MissingCredentials | Self::ClientBuild(_) => {
                ErrorKind::Configuration
            }
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Status { stage, .. } => match stage {
                Stage::InitialPage | Stage::InitialAuthData => ErrorKind::Transport,
                Stage::SubmitCredentials => ErrorKind::Authentication,
                Stage::ApplicationEntry | Stage::AssertionConsumer | Stage::FollowUp => {
                    ErrorKind::Downstream
                }
            },
            Self::Decode { stage, .. } => match stage {
                Stage::SubmitCredentials => ErrorKind::Authentication,
                _ => ErrorKind::Protocol,
            },
            Self::UnsupportedCallback(_)
            | Self::MissingCallback { .. }
            | Self::EmptyCallbackInput(_)
            | Self::MissingSamlForm { .. }
            | Self::MalformedSamlForm(_)
            | Self::InvalidAction { .. } => ErrorKind::Protocol,
            Self::EmptyToken { .. } => ErrorKind::Authentication,
        }
    }

    /// Stage the error was raised in, if it came from a request.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Transport { stage, .. }
            | Self::Status { stage, .. }
            | Self::Decode { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[test]
fn test_status_kind_follows_stage() -> anyhow::Result<()> {
    let status = |stage| Error::Status {
        stage,
        url: "https://idp.example.com".to_string(),
        status: 500,
        body: String::new(),
    };

    if status(Stage::InitialPage).kind() != ErrorKind::Transport {
        anyhow::bail!("initial page status should be a transport error");
    }
    if status(Stage::SubmitCredentials).kind() != ErrorKind::Authentication {
        anyhow::bail!("credential submission status should be an authentication error");
    }
    if status(Stage::AssertionConsumer).kind() != ErrorKind::Downstream {
        anyhow::bail!("assertion consumer status should be a downstream error");
    }

    Ok(())
}

#[test]
fn test_display_carries_stage_phrase() -> anyhow::Result<()> {
    let err = Error::Status {
        stage: Stage::ApplicationEntry,
        url: "https://app.example.com".to_string(),
        status: 404,
        body: "not found".to_string(),
    };

    let msg = err.to_string();
    if msg != "application url unreachable \"https://app.example.com\": status 404: not found" {
        anyhow::bail!("Unexpected message: {}", msg);
    }

    Ok(())
}

#[test]
fn test_missing_callback_lists_seen_types() -> anyhow::Result<()> {
    let err = Error::MissingCallback {
        missing: "PasswordCallback",
        seen: vec!["NameCallback".to_string()],
    };

    if !err.to_string().ends_with("got callbacks [NameCallback]") {
        anyhow::bail!("Unexpected message: {}", err);
    }

    Ok(())
}
