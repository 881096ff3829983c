//! Message parsing — sender address and a plain-text body.

use mail_parser::{MessageParser, MimeHeaders};

use crate::error::MailboxError;

/// The parts of a message the intake pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Sender address exactly as written in the `From` header.
    pub sender: Option<String>,
    /// Plain-text body; HTML-only messages are converted to text.
    pub body: String,
}

/// Parse a raw RFC 5322 message.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage, MailboxError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or(MailboxError::Unparseable)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string());

    Ok(ParsedMessage {
        sender,
        body: extract_text(&parsed),
    })
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    let has_plain_part = parsed.text_part(0).is_some_and(|part| !is_html(part));
    if has_plain_part && let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return html_to_text(html.as_ref());
    }
    parsed
        .body_text(0)
        .map(|text| text.to_string())
        .unwrap_or_default()
}

fn is_html(part: &mail_parser::MessagePart) -> bool {
    MimeHeaders::content_type(part).is_some_and(|ct| {
        ct.ctype().eq_ignore_ascii_case("text")
            && ct.subtype().is_some_and(|sub| sub.eq_ignore_ascii_case("html"))
    })
}

/// Strip HTML tags, keeping block boundaries as line breaks. The contents of
/// non-rendered elements (`head`, `style`, `script`, `title`) are dropped.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut tag = String::new();
    let mut in_tag = false;
    // Name of the non-rendered element whose content is being skipped.
    let mut skipping: Option<String> = None;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag_name(&tag);
                let closing = tag.trim_start().starts_with('/');
                match &skipping {
                    Some(open) => {
                        if closing && *open == name {
                            skipping = None;
                        }
                    }
                    None if !closing && is_hidden(&name) && !tag.trim_end().ends_with('/') => {
                        skipping = Some(name);
                    }
                    None => {
                        if breaks_line(&name) {
                            out.push('\n');
                        }
                    }
                }
            }
            _ if in_tag => tag.push(ch),
            _ if skipping.is_some() => {}
            _ => out.push(ch),
        }
    }

    decode_entities(&out)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowercased element name of a tag body such as `/div` or `br/` or `p class="x"`.
fn tag_name(tag: &str) -> String {
    tag.trim_start()
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn is_hidden(name: &str) -> bool {
    matches!(name, "head" | "style" | "script" | "title")
}

fn breaks_line(name: &str) -> bool {
    matches!(
        name,
        "br" | "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "table"
    )
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_message() {
        let raw = b"From: Doc <doc@clinic.com>\r\n\
To: intake@example.com\r\n\
Subject: New patient\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Jane Doe\r\n\
Phone Number: 555-1234\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.sender.as_deref(), Some("doc@clinic.com"));
        assert!(parsed.body.starts_with("Jane Doe"));
        assert!(parsed.body.contains("Phone Number: 555-1234"));
    }

    #[test]
    fn sender_case_is_preserved() {
        let raw = b"From: A@X.com\r\nSubject: hi\r\n\r\nBody\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.sender.as_deref(), Some("A@X.com"));
    }

    #[test]
    fn html_only_message_becomes_text() {
        let raw = b"From: doc@clinic.com\r\n\
Subject: html\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>Jane Doe</p><p>Service: Checkup</p></body></html>\r\n";
        let parsed = parse_message(raw).unwrap();
        let fields = crate::extract::extract(&parsed.body);
        assert_eq!(fields.name.as_deref(), Some("Jane Doe"));
        assert_eq!(fields.service.as_deref(), Some("Checkup"));
    }

    #[test]
    fn missing_from_header() {
        let raw = b"Subject: anonymous\r\n\r\nJane\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.sender, None);
    }

    #[test]
    fn html_to_text_keeps_block_breaks() {
        assert_eq!(
            html_to_text("<div>Jane   Doe</div><div>Phone Number: 1<br/>Service: X</div>"),
            "Jane Doe\nPhone Number: 1\nService: X"
        );
    }

    #[test]
    fn html_to_text_decodes_entities() {
        assert_eq!(
            html_to_text("<p>Special Note: a &amp; b &lt;c&gt;</p>"),
            "Special Note: a & b <c>"
        );
    }

    #[test]
    fn html_to_text_inline_tags_do_not_break() {
        assert_eq!(html_to_text("<b>Bold</b> and <i>italic</i>"), "Bold and italic");
    }

    #[test]
    fn html_to_text_drops_head_style_and_script() {
        let html = "<html><head><title>Intake</title>\
<style>p { margin: 0 }</style></head>\
<body><script>var x = 1;</script><p>Jane Doe</p><p>Service: Checkup</p></body></html>";
        assert_eq!(html_to_text(html), "Jane Doe\nService: Checkup");
    }

    #[test]
    fn html_message_with_stylesheet_names_record_from_body() {
        let raw = b"From: doc@clinic.com\r\n\
Subject: html\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><head><style>p { margin: 0 }</style></head>\
<body><p>Jane Doe</p><p>Phone Number: 555-1234</p></body></html>\r\n";
        let parsed = parse_message(raw).unwrap();
        let fields = crate::extract::extract(&parsed.body);
        assert_eq!(fields.name.as_deref(), Some("Jane Doe"));
        assert_eq!(fields.phone.as_deref(), Some("555-1234"));
    }

    #[test]
    fn html_to_text_empty() {
        assert_eq!(html_to_text(""), "");
    }
}
