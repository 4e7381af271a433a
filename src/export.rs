//! Standalone HTML export of a single note.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use quick_xml::escape::escape;

use crate::collab::NoteExporter;
use crate::editor::Document;
use crate::error::Result;
use crate::model::{format_timestamp, Note};

/// File name for an exported note: every character outside `[A-Za-z0-9]`
/// becomes `_` and the result is lowercased.
pub fn export_file_name(title: &str, extension: &str) -> String {
    let stem: String = title
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() { "note".to_string() } else { stem };
    format!("{stem}.{extension}")
}

#[derive(Debug, Clone, Default)]
pub struct HtmlExporter;

impl HtmlExporter {
    pub fn render(&self, note: &Note) -> String {
        let title = escape(note.title.as_str());
        let body = Document::from_markup_lenient(&note.content).to_markup();

        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\"/>\n");
        let _ = writeln!(out, "<title>{title}</title>");
        out.push_str("</head>\n<body>\n<article class=\"note\">\n");
        let _ = writeln!(out, "<h1>{title}</h1>");

        let mut meta = Vec::new();
        if let Some(created) = note.created_at {
            meta.push(format!("Created {}", format_timestamp(created)));
        }
        if let Some(updated) = note.updated_at {
            meta.push(format!("Updated {}", format_timestamp(updated)));
        }
        if let Some(category) = note.category.as_deref().filter(|c| !c.is_empty()) {
            meta.push(format!("Category {}", escape(category)));
        }
        if !meta.is_empty() {
            let _ = writeln!(out, "<p class=\"meta\">{}</p>", meta.join(" &middot; "));
        }
        if !note.tags.is_empty() {
            out.push_str("<p class=\"tags\">");
            for tag in &note.tags {
                let _ = write!(out, "<span class=\"tag\">{}</span>", escape(tag.as_str()));
            }
            out.push_str("</p>\n");
        }

        let _ = writeln!(out, "<section class=\"content\">{body}</section>");

        if !note.attachments.is_empty() {
            out.push_str("<section class=\"attachments\">\n<h2>Attachments</h2>\n<ul>\n");
            for attachment in &note.attachments {
                let name = escape(attachment.name.as_str());
                let size = attachment.display_size();
                if attachment.url.is_empty() {
                    let _ = writeln!(out, "<li>{name} ({size})</li>");
                } else {
                    let _ = writeln!(
                        out,
                        "<li><a href=\"{}\">{name}</a> ({size})</li>",
                        escape(attachment.url.as_str())
                    );
                }
            }
            out.push_str("</ul>\n</section>\n");
        }

        out.push_str("</article>\n</body>\n</html>\n");
        out
    }
}

impl NoteExporter for HtmlExporter {
    fn export(&self, note: &Note, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating export directory {}", dir.display()))?;
        let target = dir.join(export_file_name(&note.title, "html"));
        fs::write(&target, self.render(note))
            .with_context(|| format!("writing export {}", target.display()))?;
        tracing::info!(note_id = %note.id, path = %target.display(), "note exported");
        Ok(target)
    }
}
