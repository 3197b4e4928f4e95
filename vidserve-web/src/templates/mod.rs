//! HTML pages rendered by the server.
//!
//! Pages are plain HTML files with `{{ name }}` placeholders, filled in by
//! [`render`] in one pass over the template. Every value that came from the
//! filesystem or a client is escaped before substitution.

const LISTING_TEMPLATE: &str = include_str!("../../templates/listing.html");
const PLAYER_TEMPLATE: &str = include_str!("../../templates/player.html");
const STATUS_TEMPLATE: &str = include_str!("../../templates/status.html");

/// Seconds between reloads of the "processing" page.
pub const PROCESSING_REFRESH_SECONDS: u32 = 5;

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// File name as shown to the user (directories end in `/`)
    pub label: String,
    /// Absolute, percent-encoded link target
    pub href: String,
    /// Link target of the streaming-mode variant, for convertible videos
    pub stream_href: Option<String>,
}

/// Directory listing for `display_path`.
pub fn listing_page(display_path: &str, entries: &[ListingEntry]) -> String {
    let rows: String = entries
        .iter()
        .map(|entry| {
            let stream = match &entry.stream_href {
                Some(href) => format!(
                    "<a class=\"stream\" href=\"{}\">[Stream]</a>",
                    escape_html(href)
                ),
                None => String::new(),
            };
            format!(
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td></tr>\n",
                escape_html(&entry.href),
                escape_html(&entry.label),
                stream
            )
        })
        .collect();

    let path = escape_html(display_path);
    render(LISTING_TEMPLATE, &[("path", path.as_str()), ("rows", rows.as_str())])
}

/// hls.js player with audio and subtitle pickers.
pub fn player_page(title: &str, manifest_url: &str) -> String {
    let title = escape_html(title);
    let manifest_url = escape_html(manifest_url);
    render(
        PLAYER_TEMPLATE,
        &[("title", title.as_str()), ("manifest_url", manifest_url.as_str())],
    )
}

/// Self-refreshing page shown while a conversion runs.
pub fn processing_page(title: &str) -> String {
    status_page(
        "Processing Video...",
        &format!("{} is being prepared for streaming. Please wait...", escape_html(title)),
        "white",
        Some(PROCESSING_REFRESH_SECONDS),
    )
}

/// Page shown when the last conversion failed.
pub fn failure_page(title: &str, diagnostic: &str) -> String {
    status_page(
        "Conversion Failed",
        &format!(
            "{} could not be converted: {}",
            escape_html(title),
            escape_html(diagnostic)
        ),
        "red",
        None,
    )
}

/// Minimal page for 4xx/5xx responses.
pub fn error_page(status: http::StatusCode) -> String {
    let heading = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    status_page(&heading, "", "white", None)
}

fn status_page(heading: &str, message_html: &str, color: &str, refresh: Option<u32>) -> String {
    let refresh = refresh
        .map(|secs| format!("<meta http-equiv=\"refresh\" content=\"{secs}\">\n"))
        .unwrap_or_default();
    let heading = escape_html(heading);
    render(
        STATUS_TEMPLATE,
        &[
            ("refresh", refresh.as_str()),
            ("heading", heading.as_str()),
            ("color", color),
            ("message", message_html),
        ],
    )
}

/// Fill `{{ name }}` placeholders in `template` from `values`.
///
/// Substituted text is copied to the output and never scanned again, so a
/// value that itself looks like a placeholder stays literal. Unknown names
/// are left in place.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            rest = &rest[open..];
            break;
        };
        let name = after[..close].trim();
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

/// Escape text for use in HTML content and double- or single-quoted attributes.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
