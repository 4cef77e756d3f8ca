// ABOUTME: Renders detected changes as one digest: subject line, plain text and HTML bodies.
// ABOUTME: Changes are grouped by category in alphabetical order; every value is HTML-escaped.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};

use crate::models::ChangeRecord;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RULE_WIDTH: usize = 60;
const FOOTER: &str = "This is an automated message from Website Monitor.";

/// A rendered change report.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    generated_at: DateTime<Local>,
    total: usize,
    groups: BTreeMap<String, Vec<ChangeRecord>>,
}

impl Digest {
    /// Groups `changes` by category. Within a category, scan order is kept.
    pub fn build(changes: &[ChangeRecord], generated_at: DateTime<Local>) -> Self {
        let mut groups: BTreeMap<String, Vec<ChangeRecord>> = BTreeMap::new();
        for change in changes {
            groups
                .entry(change.category.clone())
                .or_default()
                .push(change.clone());
        }
        Self {
            generated_at,
            total: changes.len(),
            groups,
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Category names in rendering order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn subject(&self) -> String {
        format!("Website Monitor: {} Change(s) Detected", self.total)
    }

    pub fn text(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut lines = vec![
            "Website Change Detection Report".to_string(),
            format!("Generated: {}", self.generated_at.format(TIMESTAMP_FORMAT)),
            String::new(),
            format!("{} website(s) changed:", self.total),
            String::new(),
            rule.clone(),
        ];

        for (category, changes) in &self.groups {
            lines.push(String::new());
            lines.push(format!("📁 {}", category));
            for change in changes {
                lines.push(format!("  • {}", change.url));
                if let Some(title) = &change.title {
                    lines.push(format!("    {}", title));
                }
                lines.push(format!(
                    "    Detected: {}",
                    change.detected_at.format(TIMESTAMP_FORMAT)
                ));
            }
            lines.push(String::new());
        }

        lines.push(rule);
        lines.push(String::new());
        lines.push(FOOTER.to_string());
        lines.join("\n")
    }

    pub fn html(&self) -> String {
        let mut parts = vec![
            "<html><body style='font-family: Arial, sans-serif;'>".to_string(),
            "<h2>Website Change Detection Report</h2>".to_string(),
            format!(
                "<p><small>Generated: {}</small></p>",
                self.generated_at.format(TIMESTAMP_FORMAT)
            ),
            format!("<p><strong>{} website(s) changed:</strong></p>", self.total),
            "<hr>".to_string(),
        ];

        for (category, changes) in &self.groups {
            parts.push(format!("<h3>📁 {}</h3><ul>", escape_html(category)));
            for change in changes {
                let url = escape_html(&change.url);
                let label = change
                    .title
                    .as_deref()
                    .map(escape_html)
                    .unwrap_or_else(|| url.clone());
                parts.push("<li>".to_string());
                parts.push(format!("<a href=\"{}\">{}</a>", url, label));
                parts.push(format!(
                    "<br><small>Detected: {}</small>",
                    change.detected_at.format(TIMESTAMP_FORMAT)
                ));
                parts.push("</li>".to_string());
            }
            parts.push("</ul>".to_string());
        }

        parts.push("<hr>".to_string());
        parts.push(format!("<p><small>{}</small></p>", FOOTER));
        parts.push("</body></html>".to_string());
        parts.join("\n")
    }
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
