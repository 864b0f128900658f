//! Wire model of the `/json/realms/root/authenticate` exchange.
//!
//! The identity provider answers the first request with an [`AuthChallenge`]:
//! an opaque `authId` plus the callbacks of the current authentication tree
//! node. The client fills the input slots it understands and posts the whole
//! structure back unchanged otherwise. A successful resubmission yields a
//! [`LoginResult`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Wire name of the callback carrying the username.
pub const NAME_CALLBACK: &str = "NameCallback";

/// Wire name of the callback carrying the password.
pub const PASSWORD_CALLBACK: &str = "PasswordCallback";

/// Request and response data for the authenticate endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChallenge {
    #[serde(rename = "authId")]
    auth_id: String,
    #[serde(default)]
    callbacks: Vec<Callback>,
}

/// One step of the authentication tree the server wants answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callback {
    #[serde(rename = "type")]
    kind: CallbackKind,
    #[serde(rename = "output", default)]
    outputs: Vec<NameValue>,
    #[serde(rename = "input", default)]
    inputs: Vec<NameValue>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

/// A named value inside a callback's `output` or `input` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Callback types the client knows how to answer.
///
/// Anything else lands in `Unsupported` and aborts the login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CallbackKind {
    Name,
    Password,
    Unsupported(String),
}

impl CallbackKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Name => NAME_CALLBACK,
            Self::Password => PASSWORD_CALLBACK,
            Self::Unsupported(kind) => kind,
        }
    }
}

impl From<String> for CallbackKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            NAME_CALLBACK => Self::Name,
            PASSWORD_CALLBACK => Self::Password,
            _ => Self::Unsupported(kind),
        }
    }
}

impl From<CallbackKind> for String {
    fn from(kind: CallbackKind) -> Self {
        match kind {
            CallbackKind::Unsupported(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthChallenge {
    pub fn auth_id(&self) -> &str {
        &self.auth_id
    }

    pub fn callbacks(&self) -> &[Callback] {
        &self.callbacks
    }

    /// Writes the credentials into the name and password callbacks.
    ///
    /// Fails on the first callback of an unsupported type, and when either a
    /// name or a password callback is absent. The callback list itself is
    /// never reordered, extended or shortened.
    pub fn fill_credentials(&mut self, credentials: &Credentials) -> Result<()> {
        let mut username_filled = false;
        let mut password_filled = false;

        for callback in &mut self.callbacks {
            let value = match &callback.kind {
                CallbackKind::Name => {
                    username_filled = true;
                    credentials.username()
                }
                CallbackKind::Password => {
                    password_filled = true;
                    credentials.password()
                }
                CallbackKind::Unsupported(kind) => {
                    return Err(Error::UnsupportedCallback(kind.clone()));
                }
            };
            callback.fill(value)?;
        }

        if !username_filled {
            return Err(self.missing(NAME_CALLBACK));
        }
        if !password_filled {
            return Err(self.missing(PASSWORD_CALLBACK));
        }

        Ok(())
    }

    fn missing(&self, missing: &'static str) -> Error {
        Error::MissingCallback {
            missing,
            seen: self
                .callbacks
                .iter()
                .map(|callback| callback.kind.as_str().to_string())
                .collect(),
        }
    }
}

impl Callback {
    pub fn kind(&self) -> &CallbackKind {
        &self.kind
    }

    pub fn outputs(&self) -> &[NameValue] {
        &self.outputs
    }

    pub fn inputs(&self) -> &[NameValue] {
        &self.inputs
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    // Only the first input slot is ever written.
    fn fill(&mut self, value: &str) -> Result<()> {
        let slot = self
            .inputs
            .first_mut()
            .ok_or_else(|| Error::EmptyCallbackInput(self.kind.to_string()))?;
        slot.value = Value::String(value.to_string());
        Ok(())
    }
}

/// Response data for a successful authentication.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    #[serde(default)]
    token_id: String,
    #[serde(default)]
    success_url: String,
    #[serde(default)]
    realm: String,
}

impl LoginResult {
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn success_url(&self) -> &str {
        &self.success_url
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }
}

impl fmt::Debug for LoginResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResult")
            .field("token_id", &"<redacted>")
            .field("success_url", &self.success_url)
            .field("realm", &self.realm)
            .finish()
    }
}

#[cfg(test)]
fn sample_challenge(kinds: &[&str]) -> AuthChallenge {
    let callbacks = kinds
        .iter()
        .enumerate()
        .map(|(id, kind)| {
            serde_json::json!({
                "type": kind,
                "output": [{"name": "prompt", "value": format!("{kind} prompt")}],
                "input": [{"name": format!("IDToken{}", id + 1), "value": ""}],
                "_id": id,
            })
        })
        .collect::<Vec<_>>();

    serde_json::from_value(serde_json::json!({
        "authId": "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9.opaque",
        "template": "",
        "stage": "DataStore1",
        "callbacks": callbacks,
    }))
    .expect("sample challenge should deserialize")
}

#[test]
fn test_fill_credentials() -> anyhow::Result<()> {
    let mut challenge = sample_challenge(&[NAME_CALLBACK, PASSWORD_CALLBACK]);
    challenge.fill_credentials(&Credentials::new("alice", "secret"))?;

    let filled = serde_json::to_value(&challenge)?;
    let expected = serde_json::json!({
        "authId": "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9.opaque",
        "callbacks": [
            {
                "type": "NameCallback",
                "output": [{"name": "prompt", "value": "NameCallback prompt"}],
                "input": [{"name": "IDToken1", "value": "alice"}],
                "_id": 0,
            },
            {
                "type": "PasswordCallback",
                "output": [{"name": "prompt", "value": "PasswordCallback prompt"}],
                "input": [{"name": "IDToken2", "value": "secret"}],
                "_id": 1,
            },
        ],
    });
    if filled != expected {
        anyhow::bail!("Unexpected filled challenge: {}", filled);
    }

    Ok(())
}

#[test]
fn test_fill_credentials_follows_server_order() -> anyhow::Result<()> {
    let mut challenge = sample_challenge(&[PASSWORD_CALLBACK, NAME_CALLBACK]);
    challenge.fill_credentials(&Credentials::new("alice", "secret"))?;

    let values = challenge
        .callbacks()
        .iter()
        .map(|callback| callback.inputs()[0].value.clone())
        .collect::<Vec<_>>();
    if values != [Value::from("secret"), Value::from("alice")] {
        anyhow::bail!("Unexpected input values: {:?}", values);
    }

    Ok(())
}

#[test]
fn test_fill_credentials_rejects_unsupported_callback() -> anyhow::Result<()> {
    let mut challenge =
        sample_challenge(&[NAME_CALLBACK, "ChoiceCallback", PASSWORD_CALLBACK]);

    match challenge.fill_credentials(&Credentials::new("alice", "secret")) {
        Err(Error::UnsupportedCallback(kind)) if kind == "ChoiceCallback" => Ok(()),
        other => anyhow::bail!("Expected UnsupportedCallback, got {:?}", other),
    }
}

#[test]
fn test_fill_credentials_requires_password_callback() -> anyhow::Result<()> {
    let mut challenge = sample_challenge(&[NAME_CALLBACK]);

    match challenge.fill_credentials(&Credentials::new("alice", "secret")) {
        Err(Error::MissingCallback { missing, seen }) => {
            if missing != PASSWORD_CALLBACK || seen != [NAME_CALLBACK] {
                anyhow::bail!("Unexpected missing callback error: {} {:?}", missing, seen);
            }
            Ok(())
        }
        other => anyhow::bail!("Expected MissingCallback, got {:?}", other),
    }
}

#[test]
fn test_fill_credentials_requires_name_callback() -> anyhow::Result<()> {
    let mut challenge = sample_challenge(&[PASSWORD_CALLBACK]);

    match challenge.fill_credentials(&Credentials::new("alice", "secret")) {
        Err(Error::MissingCallback { missing, .. }) if missing == NAME_CALLBACK => Ok(()),
        other => anyhow::bail!("Expected MissingCallback, got {:?}", other),
    }
}

#[test]
fn test_fill_credentials_without_input_slot() -> anyhow::Result<()> {
    let mut challenge: AuthChallenge = serde_json::from_value(serde_json::json!({
        "authId": "abc",
        "callbacks": [{"type": "NameCallback", "output": [], "input": []}],
    }))?;

    match challenge.fill_credentials(&Credentials::new("alice", "secret")) {
        Err(Error::EmptyCallbackInput(kind)) if kind == NAME_CALLBACK => Ok(()),
        other => anyhow::bail!("Expected EmptyCallbackInput, got {:?}", other),
    }
}

#[test]
fn test_login_result_missing_token() -> anyhow::Result<()> {
    let result: LoginResult = serde_json::from_str(r#"{"successUrl": "/console", "realm": "/"}"#)?;
    if !result.token_id().is_empty() {
        anyhow::bail!("Expected empty token id");
    }
    Ok(())
}

#[test]
fn test_login_result_debug_redacts_token() -> anyhow::Result<()> {
    let result: LoginResult = serde_json::from_str(
        r#"{"tokenId": "AQIC5w-session", "successUrl": "/console", "realm": "/"}"#,
    )?;
    if result.token_id() != "AQIC5w-session" {
        anyhow::bail!("Unexpected token id: {}", result.token_id());
    }
    if format!("{:?}", result).contains("AQIC5w-session") {
        anyhow::bail!("Token leaked in debug output: {:?}", result);
    }
    Ok(())
}
