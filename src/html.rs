//! Point extraction of a single HTML form.
//!
//! This is not an HTML parser. It finds the first `<form>` start tag, reads
//! its attributes, and reads the attributes of the `<input>` tags up to the
//! matching `</form>` (or the end of the document). Quoted attribute values
//! may contain `>`. Comments and `<script>` bodies are blanked out first, so
//! markup inside them is never picked up.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script\s*>").expect("hidden pattern is valid")
});

static FORM_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<form\b((?:[^>"']|"[^"]*"|'[^']*')*)>"#).expect("form pattern is valid")
});

static FORM_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</form\s*>").expect("form close pattern is valid"));

static INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<input\b((?:[^>"']|"[^"]*"|'[^']*')*)>"#).expect("input pattern is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute pattern is valid")
});

/// The first form of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    attributes: HashMap<String, String>,
    inputs: Vec<HashMap<String, String>>,
}

impl Form {
    /// Finds the first form in `html`.
    pub fn first(html: &str) -> Option<Self> {
        // Same byte length, so offsets into `html` stay valid.
        let html = HIDDEN.replace_all(html, |caps: &Captures| " ".repeat(caps[0].len()));
        let html = html.as_ref();

        let open = FORM_OPEN.captures(html)?;
        let attributes = parse_attributes(open.get(1).map_or("", |m| m.as_str()));

        let rest = &html[open.get(0)?.end()..];
        let content = match FORM_CLOSE.find(rest) {
            Some(close) => &rest[..close.start()],
            None => rest,
        };

        let inputs = INPUT
            .captures_iter(content)
            .map(|input| parse_attributes(input.get(1).map_or("", |m| m.as_str())))
            .collect();

        Some(Self { attributes, inputs })
    }

    /// Value of an attribute of the `<form>` tag itself.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `value` of the first input whose `name` is exactly `name`.
    pub fn input_value(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|input| input.get("name").map(String::as_str) == Some(name))
            .and_then(|input| input.get("value"))
            .map(String::as_str)
    }
}

// Attribute names are case-insensitive; the first occurrence wins.
fn parse_attributes(tag: &str) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    for capture in ATTRIBUTE.captures_iter(tag) {
        let Some(name) = capture.get(1) else {
            continue;
        };
        let value = capture
            .get(2)
            .or_else(|| capture.get(3))
            .or_else(|| capture.get(4))
            .map_or(String::new(), |m| decode_entities(m.as_str()));
        attributes
            .entry(name.as_str().to_ascii_lowercase())
            .or_insert(value);
    }
    attributes
}

// Longest reference looked at, counting the leading `&`.
const MAX_REFERENCE_LEN: usize = 32;

/// Decodes the character references found in attribute values.
pub fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        rest = &rest[start..];

        let replacement = rest
            .find(';')
            .filter(|&end| end <= MAX_REFERENCE_LEN)
            .and_then(|end| decode_reference(&rest[1..end]).map(|c| (c, end)));

        match replacement {
            Some((c, end)) => {
                decoded.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

fn decode_reference(reference: &str) -> Option<char> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        return char::from_u32(code);
    }

    match reference {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => None,
    }
}

#[test]
fn test_first_form() -> anyhow::Result<()> {
    let html = r#"<html><body onload="document.forms[0].submit()">
        <FORM METHOD="post" action="https://app.example.com/saml/acs?a=1&amp;b=2">
            <input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNlPg==" />
            <input type=hidden name=RelayState value='/dashboard'>
            <noscript><input type="submit" value="Continue"></noscript>
        </FORM>
        <form action="/second"><input name="SAMLResponse" value="other"></form>
    </body></html>"#;

    let form = Form::first(html).ok_or_else(|| anyhow::anyhow!("form not found"))?;
    if form.attribute("action") != Some("https://app.example.com/saml/acs?a=1&b=2") {
        anyhow::bail!("Unexpected action: {:?}", form.attribute("action"));
    }
    if form.attribute("method") != Some("post") {
        anyhow::bail!("Unexpected method: {:?}", form.attribute("method"));
    }
    if form.input_value("SAMLResponse") != Some("PHNhbWxwOlJlc3BvbnNlPg==") {
        anyhow::bail!("Unexpected SAMLResponse: {:?}", form.input_value("SAMLResponse"));
    }
    if form.input_value("RelayState") != Some("/dashboard") {
        anyhow::bail!("Unexpected RelayState: {:?}", form.input_value("RelayState"));
    }

    Ok(())
}

#[test]
fn test_inputs_outside_form_are_ignored() -> anyhow::Result<()> {
    let html = r#"<input name="SAMLResponse" value="before">
        <form action="/acs"><input name="RelayState" value="x"></form>
        <input name="SAMLResponse" value="after">"#;

    let form = Form::first(html).ok_or_else(|| anyhow::anyhow!("form not found"))?;
    if form.input_value("SAMLResponse").is_some() {
        anyhow::bail!("Picked up an input outside the form");
    }
    if form.input_value("RelayState") != Some("x") {
        anyhow::bail!("Unexpected RelayState: {:?}", form.input_value("RelayState"));
    }

    Ok(())
}

#[test]
fn test_commented_out_form_is_skipped() -> anyhow::Result<()> {
    let html = r#"<html><!-- <form action="/legacy-acs"> --><body>
        <script>document.write('<form action="/scripted-acs">');</script>
        <form method="post" action="/saml/acs">
            <!-- <input name="SAMLResponse" value="stale"> -->
            <input type="hidden" name="SAMLResponse" value="PHNhbWw+" />
            <input type="hidden" name="RelayState" value="/home" />
        </form></body></html>"#;

    let form = Form::first(html).ok_or_else(|| anyhow::anyhow!("form not found"))?;
    if form.attribute("action") != Some("/saml/acs") {
        anyhow::bail!("Unexpected action: {:?}", form.attribute("action"));
    }
    if form.input_value("SAMLResponse") != Some("PHNhbWw+") {
        anyhow::bail!("Unexpected SAMLResponse: {:?}", form.input_value("SAMLResponse"));
    }
    if form.input_value("RelayState") != Some("/home") {
        anyhow::bail!("Unexpected RelayState: {:?}", form.input_value("RelayState"));
    }

    Ok(())
}

#[test]
fn test_quoted_gt_in_attribute() -> anyhow::Result<()> {
    let html = r#"<form data-note="a > b" action="/acs"><input name="x" value="1 > 0"></form>"#;

    let form = Form::first(html).ok_or_else(|| anyhow::anyhow!("form not found"))?;
    if form.attribute("action") != Some("/acs") || form.input_value("x") != Some("1 > 0") {
        anyhow::bail!("Unexpected form: {:?}", form);
    }

    Ok(())
}

#[test]
fn test_no_form() -> anyhow::Result<()> {
    if Form::first("<html><p>SAMLResponse</p></html>").is_some() {
        anyhow::bail!("Expected no form");
    }
    Ok(())
}

#[test]
fn test_decode_entities() -> anyhow::Result<()> {
    let cases = [
        ("plain", "plain"),
        ("a&amp;b", "a&b"),
        ("&lt;x&gt; &quot;y&quot; &#39;z&#x27;", "<x> \"y\" 'z'"),
        ("AT&T", "AT&T"),
        ("&unknown;", "&unknown;"),
        ("&#x0001F600;&#0000000065;", "\u{1F600}A"),
        ("trailing &", "trailing &"),
    ];

    for (input, expected) in cases {
        let decoded = decode_entities(input);
        if decoded != expected {
            anyhow::bail!(
                "decode_entities({:?}) = {:?}, expected {:?}",
                input,
                decoded,
                expected
            );
        }
    }

    Ok(())
}
