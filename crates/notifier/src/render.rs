//! Minimal HTML rendering for campaign bodies.

use mailcast_common::types::CampaignStyle;

/// Render a campaign body into a complete HTML document.
///
/// HTML bodies are embedded as-is. Markdown bodies are treated as plain
/// text: markup is not interpreted, the text is escaped, blank lines split
/// paragraphs and single newlines become `<br>`.
pub fn render_campaign(body: &str, style: CampaignStyle, project_name: &str) -> String {
    let content = match style {
        CampaignStyle::Html => body.to_string(),
        CampaignStyle::Markdown => text_to_html(body),
    };

    format!(
        "<!DOCTYPE html><html><body>{}<footer><p>{}</p></footer></body></html>",
        content,
        escape(project_name)
    )
}

fn text_to_html(body: &str) -> String {
    body.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", escape(p).replace('\n', "<br>")))
        .collect()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
