use anyhow::{bail, Result};
use forgerock::{Credentials, Error, ErrorKind, ForgeRockClient, Stage};
use httpmock::prelude::*;
use httpmock::Mock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde_json::{json, Value};

const AUTH_PATH: &str = "/am/json/realms/root/authenticate";
const SAML_RESPONSE: &str = "PHNhbWxwOlJlc3BvbnNlIC8+";
const SESSION_COOKIE: &str = "iPlanetDirectoryPro=AQIC5wM2LY4Sfcx";

fn challenge(callbacks: &[&str]) -> Value {
    let callbacks = callbacks
        .iter()
        .enumerate()
        .map(|(id, kind)| {
            json!({
                "type": kind,
                "output": [{"name": "prompt", "value": format!("{kind}:")}],
                "input": [{"name": format!("IDToken{}", id + 1), "value": ""}],
                "_id": id,
            })
        })
        .collect::<Vec<_>>();
    json!({"authId": "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9.e30.sig", "callbacks": callbacks})
}

fn filled_challenge(username: &str, password: &str) -> Value {
    json!({
        "authId": "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9.e30.sig",
        "callbacks": [
            {
                "type": "NameCallback",
                "output": [{"name": "prompt", "value": "NameCallback:"}],
                "input": [{"name": "IDToken1", "value": username}],
                "_id": 0,
            },
            {
                "type": "PasswordCallback",
                "output": [{"name": "prompt", "value": "PasswordCallback:"}],
                "input": [{"name": "IDToken2", "value": password}],
                "_id": 1,
            },
        ],
    })
}

fn post_binding_page(action: &str) -> String {
    format!(
        r#"<html><body onload="document.forms[0].submit()">
<form method="post" action="{action}">
<input type="hidden" name="SAMLResponse" value="{SAML_RESPONSE}" />
<input type="hidden" name="RelayState" value="/home" />
</form></body></html>"#
    )
}

struct Backend<'a> {
    server: &'a MockServer,
    initial_page: Mock<'a>,
    initial_auth: Mock<'a>,
    submit: Mock<'a>,
    app: Mock<'a>,
    acs: Mock<'a>,
}

impl<'a> Backend<'a> {
    /// Mocks a ForgeRock instance under `/am` and an application under
    /// `/app` whose assertion consumer is `/saml/acs`.
    fn start(server: &'a MockServer, callbacks: &[&str], action: &str) -> Self {
        let initial_page = server.mock(|when, then| {
            when.method(GET).path("/am");
            then.status(200).body("<html>ForgeRock</html>");
        });

        let initial_challenge = challenge(callbacks);
        let initial_auth = server.mock(|when, then| {
            when.method(POST)
                .path(AUTH_PATH)
                .header("accept", "application/json")
                .header("accept-api-version", "protocol=1.0,resource=2.1")
                .body("");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(initial_challenge);
        });

        let submit = server.mock(|when, then| {
            when.method(POST)
                .path(AUTH_PATH)
                .header("accept", "application/json")
                .header("accept-api-version", "protocol=1.0,resource=2.1")
                .header("content-type", "application/json")
                .json_body(filled_challenge("alice", "s3cret"));
            then.status(200)
                .header("content-type", "application/json")
                .header("set-cookie", format!("{SESSION_COOKIE}; Path=/"))
                .json_body(json!({
                    "tokenId": "AQIC5wM2LY4Sfcx",
                    "successUrl": "/am/console",
                    "realm": "/",
                }));
        });

        let page = post_binding_page(action);
        let app = server.mock(|when, then| {
            when.method(GET).path("/app").header("cookie", SESSION_COOKIE);
            then.status(200).header("content-type", "text/html").body(page);
        });

        let acs = server.mock(|when, then| {
            when.method(POST)
                .path("/saml/acs")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("SAMLResponse=PHNhbWxwOlJlc3BvbnNlIC8%2B&RelayState=%2Fhome");
            then.status(200).body("<html>Welcome</html>");
        });

        Self {
            server,
            initial_page,
            initial_auth,
            submit,
            app,
            acs,
        }
    }

    fn standard(server: &'a MockServer) -> Self {
        Self::start(
            server,
            &["NameCallback", "PasswordCallback"],
            &server.url("/saml/acs"),
        )
    }

    fn client(&self) -> Result<ForgeRockClient> {
        Ok(ForgeRockClient::new(self.server.url("/am"))?)
    }

    fn app_url(&self) -> String {
        self.server.url("/app")
    }
}

fn credentials() -> Credentials {
    Credentials::new("alice", "s3cret")
}

#[test]
fn test_login() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);

    let session = backend.client()?.login(&backend.app_url(), &credentials())?;

    backend.initial_page.assert();
    backend.initial_auth.assert();
    backend.submit.assert();
    backend.app.assert();
    backend.acs.assert();

    if session.login_result().token_id() != "AQIC5wM2LY4Sfcx" {
        bail!("Unexpected token id: {}", session.login_result().token_id());
    }
    if session.login_result().realm() != "/" {
        bail!("Unexpected realm: {}", session.login_result().realm());
    }

    Ok(())
}

#[test]
fn test_login_session_is_reusable() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);
    let tenants = server.mock(|when, then| {
        when.method(GET)
            .path("/app/api/tenants")
            .header("accept", "application/json")
            .header("cookie", SESSION_COOKIE);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([{"name": "openstack"}]));
    });

    let mut session = backend.client()?.login(&backend.app_url(), &credentials())?;
    let body: Value = session.get_json(&server.url("/app/api/tenants"))?;

    tenants.assert();
    if body != json!([{"name": "openstack"}]) {
        bail!("Unexpected tenants: {}", body);
    }

    Ok(())
}

#[test]
fn test_session_get_follows_login() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);
    let home = server.mock(|when, then| {
        when.method(GET).path("/app/home").header("cookie", SESSION_COOKIE);
        then.status(200).body("<html>Home</html>");
    });
    let csv = server.mock(|when, then| {
        when.method(GET)
            .path("/app/export")
            .header("accept", "text/csv")
            .header("cookie", SESSION_COOKIE);
        then.status(200).body("name\nopenstack\n");
    });
    let gone = server.mock(|when, then| {
        when.method(GET).path("/app/gone");
        then.status(404).body("no such page");
    });

    let mut session = backend.client()?.login(&backend.app_url(), &credentials())?;

    let page = session.get(&server.url("/app/home"))?;
    if page.body() != "<html>Home</html>" {
        bail!("Unexpected body: {}", page.body());
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/csv"));
    let page = session
        .session_mut()
        .get(Stage::FollowUp, &server.url("/app/export"), headers)?
        .error_for_status()?;
    if page.body() != "name\nopenstack\n" {
        bail!("Unexpected export: {}", page.body());
    }

    let err = match session.get(&server.url("/app/gone")) {
        Ok(page) => bail!("Expected 404 to fail, got {}", page.status()),
        Err(err) => err,
    };
    match &err {
        Error::Status {
            stage: Stage::FollowUp,
            status: 404,
            ..
        } => {}
        other => bail!("Expected follow-up status error, got {:?}", other),
    }
    if err.kind() != ErrorKind::Downstream {
        bail!("Unexpected error kind: {:?}", err.kind());
    }

    home.assert();
    csv.assert();
    gone.assert();

    Ok(())
}

#[test]
fn test_login_relative_form_action() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::start(&server, &["NameCallback", "PasswordCallback"], "/saml/acs");

    backend.client()?.login(&backend.app_url(), &credentials())?;
    backend.acs.assert();

    Ok(())
}

#[test]
fn test_login_callbacks_in_server_order() -> Result<()> {
    let server = MockServer::start();
    let auth_id = "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9.e30.sig";

    server.mock(|when, then| {
        when.method(GET).path("/am");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(POST).path(AUTH_PATH).body("");
        then.status(200).json_body(json!({
            "authId": auth_id,
            "callbacks": [
                {
                    "type": "PasswordCallback",
                    "output": [],
                    "input": [{"name": "IDToken2", "value": ""}],
                },
                {
                    "type": "NameCallback",
                    "output": [],
                    "input": [{"name": "IDToken1", "value": ""}],
                },
            ],
        }));
    });
    let submit = server.mock(|when, then| {
        when.method(POST).path(AUTH_PATH).json_body(json!({
            "authId": auth_id,
            "callbacks": [
                {
                    "type": "PasswordCallback",
                    "output": [],
                    "input": [{"name": "IDToken2", "value": "s3cret"}],
                },
                {
                    "type": "NameCallback",
                    "output": [],
                    "input": [{"name": "IDToken1", "value": "alice"}],
                },
            ],
        }));
        then.status(200)
            .json_body(json!({"tokenId": "AQIC5w", "successUrl": "/am/console", "realm": "/"}));
    });
    let page = post_binding_page(&server.url("/saml/acs"));
    server.mock(|when, then| {
        when.method(GET).path("/app");
        then.status(200).body(page);
    });
    let acs = server.mock(|when, then| {
        when.method(POST).path("/saml/acs");
        then.status(302).header("location", "/app/home");
    });
    server.mock(|when, then| {
        when.method(GET).path("/app/home");
        then.status(200).body("<html>Home</html>");
    });

    let client = ForgeRockClient::new(server.url("/am"))?;
    client.login(&server.url("/app"), &credentials())?;

    submit.assert();
    acs.assert();

    Ok(())
}

#[test]
fn test_login_unsupported_callback() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::start(
        &server,
        &["NameCallback", "PasswordCallback", "ChoiceCallback"],
        &server.url("/saml/acs"),
    );
    let any_submit = server.mock(|when, then| {
        when.method(POST)
            .path(AUTH_PATH)
            .header("content-type", "application/json");
        then.status(200).json_body(json!({"tokenId": "AQIC5w"}));
    });

    let err = match backend.client()?.login(&backend.app_url(), &credentials()) {
        Ok(_) => bail!("Expected login to fail"),
        Err(err) => err,
    };

    match &err {
        Error::UnsupportedCallback(kind) if kind == "ChoiceCallback" => {}
        other => bail!("Expected UnsupportedCallback, got {:?}", other),
    }
    if err.kind() != ErrorKind::Protocol || !err.to_string().contains("ChoiceCallback") {
        bail!("Unexpected error: {}", err);
    }
    backend.initial_auth.assert();
    backend.submit.assert_calls(0);
    any_submit.assert_calls(0);
    backend.app.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_missing_password_callback() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::start(&server, &["NameCallback"], &server.url("/saml/acs"));

    match backend.client()?.login(&backend.app_url(), &credentials()) {
        Err(Error::MissingCallback { missing: "PasswordCallback", .. }) => {}
        other => bail!("Expected MissingCallback, got {:?}", other),
    }
    backend.submit.assert_calls(0);
    backend.app.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_unauthorized() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);
    let rejected = server.mock(|when, then| {
        when.method(POST)
            .path(AUTH_PATH)
            .json_body(filled_challenge("bob", "wrong"));
        then.status(401)
            .header("content-type", "application/json")
            .json_body(json!({"code": 401, "reason": "Unauthorized", "message": "Login failure"}));
    });

    let err = match backend
        .client()?
        .login(&backend.app_url(), &Credentials::new("bob", "wrong"))
    {
        Ok(_) => bail!("Expected login to fail"),
        Err(err) => err,
    };

    rejected.assert();
    match &err {
        Error::Status {
            stage: Stage::SubmitCredentials,
            status: 401,
            body,
            ..
        } if body.contains("Login failure") => {}
        other => bail!("Expected 401 status error, got {:?}", other),
    }
    if err.kind() != ErrorKind::Authentication {
        bail!("Unexpected error kind: {:?}", err.kind());
    }
    backend.app.assert_calls(0);
    backend.acs.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_empty_token() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);
    let empty_token = server.mock(|when, then| {
        when.method(POST)
            .path(AUTH_PATH)
            .json_body(filled_challenge("carol", "s3cret"));
        then.status(200)
            .json_body(json!({"tokenId": "", "successUrl": "/am/console", "realm": "/"}));
    });

    let err = match backend
        .client()?
        .login(&backend.app_url(), &Credentials::new("carol", "s3cret"))
    {
        Ok(_) => bail!("Expected login to fail"),
        Err(err) => err,
    };

    empty_token.assert();
    match &err {
        Error::EmptyToken { body } if body.contains("/am/console") => {}
        other => bail!("Expected EmptyToken, got {:?}", other),
    }
    if err.kind() != ErrorKind::Authentication {
        bail!("Unexpected error kind: {:?}", err.kind());
    }
    backend.app.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_initial_page_unreachable() -> Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/am");
        then.status(503).body("maintenance");
    });
    let auth = server.mock(|when, then| {
        when.method(POST).path(AUTH_PATH);
        then.status(200);
    });

    let client = ForgeRockClient::new(server.url("/am"))?;
    let err = match client.login(&server.url("/app"), &credentials()) {
        Ok(_) => bail!("Expected login to fail"),
        Err(err) => err,
    };

    if err.stage() != Some(Stage::InitialPage) || err.kind() != ErrorKind::Transport {
        bail!("Unexpected error: {:?}", err);
    }
    if !err.to_string().starts_with("initial page unreachable") {
        bail!("Unexpected message: {}", err);
    }
    auth.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_connection_refused() -> Result<()> {
    let client = ForgeRockClient::new("http://127.0.0.1:9/am")?;

    match client.login("http://127.0.0.1:9/app", &credentials()) {
        Err(Error::Transport {
            stage: Stage::InitialPage,
            url,
            ..
        }) if url == "http://127.0.0.1:9/am" => Ok(()),
        other => bail!("Expected transport error, got {:?}", other),
    }
}

#[test]
fn test_login_initial_auth_data_not_json() -> Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/am");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(POST).path(AUTH_PATH);
        then.status(200).body("<html>not json</html>");
    });

    let client = ForgeRockClient::new(server.url("/am"))?;
    match client.login(&server.url("/app"), &credentials()) {
        Err(err @ Error::Decode { .. }) => {
            if !err.to_string().starts_with("failed to get initial auth data") {
                bail!("Unexpected message: {}", err);
            }
            Ok(())
        }
        other => bail!("Expected decode error, got {:?}", other),
    }
}

#[test]
fn test_login_initial_auth_data_error() -> Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/am");
        then.status(200);
    });
    let initial_auth = server.mock(|when, then| {
        when.method(POST).path(AUTH_PATH).body("");
        then.status(503).body("authentication service unavailable");
    });
    let submit = server.mock(|when, then| {
        when.method(POST)
            .path(AUTH_PATH)
            .header("content-type", "application/json");
        then.status(200).json_body(json!({"tokenId": "AQIC5w"}));
    });
    let app = server.mock(|when, then| {
        when.method(GET).path("/app");
        then.status(200).body(post_binding_page("/saml/acs"));
    });

    let client = ForgeRockClient::new(server.url("/am"))?;
    let err = match client.login(&server.url("/app"), &credentials()) {
        Ok(_) => bail!("Expected login to fail"),
        Err(err) => err,
    };

    match &err {
        Error::Status {
            stage: Stage::InitialAuthData,
            status: 503,
            body,
            ..
        } if body.contains("unavailable") => {}
        other => bail!("Expected initial auth data status error, got {:?}", other),
    }
    if err.kind() != ErrorKind::Transport {
        bail!("Unexpected error kind: {:?}", err.kind());
    }
    if !err.to_string().starts_with("failed to get initial auth data") {
        bail!("Unexpected message: {}", err);
    }
    initial_auth.assert();
    submit.assert_calls(0);
    app.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_without_saml_form() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);
    let plain_app = server.mock(|when, then| {
        when.method(GET).path("/plain");
        then.status(200).body("<html>Hello alice</html>");
    });

    let err = match backend.client()?.login(&server.url("/plain"), &credentials()) {
        Ok(_) => bail!("Expected login to fail"),
        Err(err) => err,
    };

    plain_app.assert();
    match &err {
        Error::MissingSamlForm { body } if body.contains("Hello alice") => {}
        other => bail!("Expected MissingSamlForm, got {:?}", other),
    }
    if err.kind() != ErrorKind::Protocol {
        bail!("Unexpected error kind: {:?}", err.kind());
    }
    backend.acs.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_application_error() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);
    server.mock(|when, then| {
        when.method(GET).path("/broken");
        then.status(500).body("boom");
    });

    match backend.client()?.login(&server.url("/broken"), &credentials()) {
        Err(err @ Error::Status { stage: Stage::ApplicationEntry, status: 500, .. }) => {
            if err.kind() != ErrorKind::Downstream {
                bail!("Unexpected error kind: {:?}", err.kind());
            }
        }
        other => bail!("Expected application error, got {:?}", other),
    }
    backend.acs.assert_calls(0);

    Ok(())
}

#[test]
fn test_login_assertion_consumer_error() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::start(
        &server,
        &["NameCallback", "PasswordCallback"],
        &server.url("/saml/failing-acs"),
    );
    let failing_acs = server.mock(|when, then| {
        when.method(POST).path("/saml/failing-acs");
        then.status(403).body("invalid assertion");
    });

    match backend.client()?.login(&backend.app_url(), &credentials()) {
        Err(err @ Error::Status { stage: Stage::AssertionConsumer, status: 403, .. }) => {
            if !err.to_string().starts_with("error completing SAML exchange") {
                bail!("Unexpected message: {}", err);
            }
        }
        other => bail!("Expected assertion consumer error, got {:?}", other),
    }
    failing_acs.assert();

    Ok(())
}

#[test]
fn test_login_empty_credentials_sends_nothing() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);

    for credentials in [Credentials::new("", "s3cret"), Credentials::new("alice", "")] {
        match backend.client()?.login(&backend.app_url(), &credentials) {
            Err(err @ Error::MissingCredentials) if err.kind() == ErrorKind::Configuration => {}
            other => bail!("Expected MissingCredentials, got {:?}", other),
        }
    }
    backend.initial_page.assert_calls(0);
    backend.initial_auth.assert_calls(0);

    Ok(())
}

#[test]
fn test_repeated_logins_issue_identical_requests() -> Result<()> {
    let server = MockServer::start();
    let backend = Backend::standard(&server);
    let client = backend.client()?;

    client.login(&backend.app_url(), &credentials())?;
    client.login(&backend.app_url(), &credentials())?;

    backend.initial_page.assert_calls(2);
    backend.initial_auth.assert_calls(2);
    backend.submit.assert_calls(2);
    backend.app.assert_calls(2);
    backend.acs.assert_calls(2);

    Ok(())
}
