//! Browser-less login to applications that use ForgeRock Access Management
//! as their SAML identity provider.
//!
//! A login runs two phases on one cookie-persisting [`Session`]:
//!
//! 1. [`authenticate()`] walks the ForgeRock authentication tree: it fetches
//!    the base page, requests the tree's callbacks, fills in the name and
//!    password callbacks and submits them.
//! 2. [`complete_sso()`] fetches the application, which answers with a SAML
//!    POST-binding form, and posts that form's `SAMLResponse` and
//!    `RelayState` to the assertion consumer service.
//!
//! [`ForgeRockClient::login`] runs both and hands back an
//! [`AuthenticatedSession`] for further requests.
//!
//! ```no_run
//! use forgerock::{Credentials, ForgeRockClient};
//!
//! # fn main() -> forgerock::Result<()> {
//! let client = ForgeRockClient::new("https://idp.example.com/am")?;
//! let mut session = client.login(
//!     "https://zuul.example.com",
//!     &Credentials::new("alice", "secret"),
//! )?;
//! let tenants: serde_json::Value = session.get_json("https://zuul.example.com/api/tenants")?;
//! # let _ = tenants;
//! # Ok(())
//! # }
//! ```

pub mod authenticate;
pub mod challenge;
pub mod client;
pub mod credentials;
pub mod error;
pub mod html;
pub mod saml;
pub mod session;

pub use authenticate::{authenticate, API_VERSION, AUTHENTICATE_PATH};
pub use challenge::{AuthChallenge, Callback, CallbackKind, LoginResult, NameValue};
pub use client::{AuthenticatedSession, ForgeRockClient};
pub use credentials::Credentials;
pub use error::{Error, ErrorKind, Result, Stage};
pub use saml::{complete_sso, SsoRedirect};
pub use session::{Page, Session};
