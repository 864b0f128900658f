use std::fmt;

use crate::error::{Error, Result};

/// Credentials used to login to ForgeRock.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Fails if either field is empty.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::MissingCredentials);
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[test]
fn test_validate_rejects_empty_fields() -> anyhow::Result<()> {
    for (username, password) in [("", "secret"), ("alice", ""), ("", "")] {
        match Credentials::new(username, password).validate() {
            Err(Error::MissingCredentials) => {}
            other => anyhow::bail!(
                "Expected MissingCredentials for {:?}/{:?}, got {:?}",
                username,
                password,
                other
            ),
        }
    }

    Credentials::new("alice", "secret").validate()?;
    Ok(())
}

#[test]
fn test_debug_redacts_password() -> anyhow::Result<()> {
    let rendered = format!("{:?}", Credentials::new("alice", "hunter2"));
    if rendered.contains("hunter2") {
        anyhow::bail!("Password leaked in debug output: {}", rendered);
    }
    if !rendered.contains("alice") {
        anyhow::bail!("Username missing from debug output: {}", rendered);
    }
    Ok(())
}
