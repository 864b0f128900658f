use std::io::{self, Write};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use forgerock::{Credentials, ForgeRockClient, Stage};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "info";

/// Logs in to a ForgeRock protected application and optionally fetches a page
/// with the authenticated session.
#[derive(Parser)]
#[command(name = "forgerock-login", version)]
struct Cli {
    /// ForgeRock Access Management base url.
    #[arg(long, env = "FORGEROCK_BASE_URL")]
    base_url: String,
    /// Application url answering with the SAML redirect form.
    #[arg(long, env = "APP_URL")]
    app_url: String,
    #[arg(long, short, env = "FORGEROCK_USERNAME")]
    username: String,
    /// Read from the terminal when not given.
    #[arg(long, env = "FORGEROCK_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Path appended to the application url and fetched after login.
    #[arg(long)]
    fetch: Option<String>,
    /// Accept header for `--fetch`.
    #[arg(long, default_value = "application/json")]
    accept: String,
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let password = match cli.password {
        Some(password) => password,
        None => rpassword::prompt_password(format!("ForgeRock password for {}: ", cli.username))
            .context("failed to read password")?,
    };
    let credentials = Credentials::new(cli.username, password);

    let client = ForgeRockClient::new(cli.base_url)?;
    let mut session = client
        .login(&cli.app_url, &credentials)
        .with_context(|| format!("login to {} failed", cli.app_url))?;
    debug!(login = ?session.login_result(), "session established");

    let Some(path) = cli.fetch else {
        return Ok(());
    };

    let url = format!("{}{}", cli.app_url.trim_end_matches('/'), path);
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_str(&cli.accept).context("invalid --accept value")?,
    );
    let page = session
        .session_mut()
        .get(Stage::FollowUp, &url, headers)?
        .error_for_status()?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", page.body()).context("failed to write response")?;
    Ok(())
}

#[test]
fn test_cli_reads_flags() -> Result<()> {
    let cli = Cli::try_parse_from([
        "forgerock-login",
        "--base-url",
        "https://idp.example.com/am",
        "--app-url",
        "https://zuul.example.com",
        "--username",
        "alice",
        "--password",
        "secret",
        "--fetch",
        "/api/tenants",
    ])?;

    if cli.base_url != "https://idp.example.com/am" || cli.username != "alice" {
        anyhow::bail!("Unexpected flags: {} {}", cli.base_url, cli.username);
    }
    if cli.fetch.as_deref() != Some("/api/tenants") || cli.accept != "application/json" {
        anyhow::bail!("Unexpected fetch flags: {:?} {}", cli.fetch, cli.accept);
    }

    Ok(())
}

#[test]
fn test_cli_requires_app_url() -> Result<()> {
    if std::env::var_os("APP_URL").is_some() {
        return Ok(());
    }

    let parsed = Cli::try_parse_from([
        "forgerock-login",
        "--base-url",
        "https://idp.example.com/am",
        "--username",
        "alice",
    ]);
    if parsed.is_ok() {
        anyhow::bail!("Expected missing --app-url to be rejected");
    }

    Ok(())
}
