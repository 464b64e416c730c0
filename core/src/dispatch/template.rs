//! HTML body for transfer mails

use crate::transfer::TransferPackage;

/// Escape text for embedding in HTML element content or attribute values
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
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

/// Render the fixed mail body around the package contents
pub fn render_body(package: &TransferPackage) -> String {
    let mut body = String::from(
        "<div style=\"font-family: sans-serif; padding: 20px; border: 1px solid #ddd;\">\n\
         <h2>Transfer Successful</h2>\n",
    );

    if let Some(text) = &package.text {
        body.push_str("<pre style=\"background:#eee; padding:10px;\">");
        body.push_str(&escape_html(text));
        body.push_str("</pre>\n");
    }

    if let Some(attachment) = &package.attachment {
        body.push_str(&format!(
            "<p>Attached: <b>{}</b> ({} bytes)</p>\n",
            escape_html(&attachment.filename),
            attachment.bytes.len()
        ));
    }

    if package.is_empty() {
        body.push_str("<p>No text or file was included in this transfer.</p>\n");
    }

    body.push_str("</div>\n");
    body
}
