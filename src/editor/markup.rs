use std::borrow::Cow;

use quick_xml::escape::{escape, partial_escape, resolve_html5_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::document::{Block, Document, Inline, Line, ListBlock, TextRun};
use super::image::{ImageId, ImageNode};
use super::style::{ListKind, Marks, TextStyle};
use crate::error::{Error, Result};

/// Class of the `<span>` wrapping every image.
pub const IMAGE_CLASS: &str = "note-image";

const MARK_TAGS: [(Marks, &str); 3] = [
    (Marks::BOLD, "b"),
    (Marks::ITALIC, "i"),
    (Marks::UNDERLINE, "u"),
];

impl Document {
    /// Serializes the whole document. Empty lines are written as `<br/>`.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            match block {
                Block::Paragraph(line) => {
                    out.push_str("<p>");
                    write_line(&mut out, line);
                    out.push_str("</p>");
                }
                Block::List(list) => {
                    write_list_open(&mut out, list);
                    for item in &list.items {
                        out.push_str("<li>");
                        write_line(&mut out, item);
                        out.push_str("</li>");
                    }
                    out.push_str(if list.kind.is_ordered() {
                        "</ol>"
                    } else {
                        "</ul>"
                    });
                }
            }
        }
        out
    }

    /// Parses stored markup. Content without any tag is treated as plain text.
    ///
    /// Browser-produced HTML is accepted: void elements such as `<br>` need no
    /// closing slash, mismatched end tags are tolerated and HTML named
    /// entities like `&nbsp;` are resolved.
    pub fn from_markup(markup: &str) -> Result<Self> {
        if !markup.contains('<') {
            return Ok(Self::from_plain_text(&decode_entities(markup)));
        }
        let mut reader = Reader::from_str(markup);
        reader.config_mut().check_end_names = false;
        let mut builder = Builder::default();
        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) if is_void(element.local_name().as_ref()) => {
                    builder.empty(&element)?
                }
                Ok(Event::Start(element)) => builder.start(&element)?,
                Ok(Event::End(element)) => builder.end(element.local_name().as_ref()),
                Ok(Event::Empty(element)) => builder.empty(&element)?,
                Ok(Event::Text(text)) => {
                    let raw = reader.decoder().decode(&text).map_err(markup_error)?;
                    builder.text(&decode_entities(&raw));
                }
                Ok(Event::CData(data)) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    builder.text(&text);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(Error::Markup(format!(
                        "at byte {}: {err}",
                        reader.buffer_position()
                    )))
                }
            }
        }
        Ok(builder.finish())
    }

    /// Like [`Document::from_markup`], but falls back to one paragraph per line.
    pub fn from_markup_lenient(markup: &str) -> Self {
        match Self::from_markup(markup) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(error = %err, "content is not valid markup; loading as plain text");
                Self::from_plain_text(markup)
            }
        }
    }
}

fn markup_error(err: impl std::fmt::Display) -> Error {
    Error::Markup(err.to_string())
}

fn is_void(name: &[u8]) -> bool {
    matches!(name, b"br" | b"img" | b"hr" | b"wbr")
}

/// Resolves XML and HTML named or numeric entities. A stray `&` or an unknown
/// entity is kept as written.
fn decode_entities(raw: &str) -> Cow<'_, str> {
    unescape_with(raw, resolve_html5_entity).unwrap_or(Cow::Borrowed(raw))
}

fn write_list_open(out: &mut String, list: &ListBlock) {
    if !list.kind.is_ordered() {
        out.push_str("<ul>");
        return;
    }
    out.push_str("<ol");
    if let Some(kind) = list.kind.ol_type() {
        out.push_str(&format!(" type=\"{kind}\""));
    }
    if list.start != 1 {
        out.push_str(&format!(" start=\"{}\"", list.start));
    }
    out.push('>');
}

fn write_line(out: &mut String, line: &Line) {
    if line.is_empty() {
        out.push_str("<br/>");
        return;
    }
    for node in line.nodes() {
        match node {
            Inline::Text(run) => write_run(out, run),
            Inline::Image(image) => write_image(out, image),
        }
    }
}

fn write_run(out: &mut String, run: &TextRun) {
    let css = run.style.css();
    if !css.is_empty() {
        out.push_str(&format!("<span style=\"{}\">", escape(css.as_str())));
    }
    for (mark, tag) in MARK_TAGS {
        if run.style.marks.contains(mark) {
            out.push_str(&format!("<{tag}>"));
        }
    }
    out.push_str(&partial_escape(run.text.as_str()));
    for (mark, tag) in MARK_TAGS.iter().rev() {
        if run.style.marks.contains(*mark) {
            out.push_str(&format!("</{tag}>"));
        }
    }
    if !css.is_empty() {
        out.push_str("</span>");
    }
}

fn write_image(out: &mut String, image: &ImageNode) {
    out.push_str(&format!(
        "<span class=\"{IMAGE_CLASS}\"><img src=\"{}\" alt=\"{}\" width=\"{}\" height=\"{}\" \
         data-natural-width=\"{}\" data-natural-height=\"{}\"/></span>",
        escape(image.src.as_str()),
        escape(image.alt.as_str()),
        image.width,
        image.height,
        image.natural_width,
        image.natural_height,
    ));
}

struct OpenLine {
    line: Line,
    item: bool,
    /// Opened by a `<br>`; dropped if nothing follows before the block ends.
    after_break: bool,
}

#[derive(Default)]
struct Builder {
    blocks: Vec<Block>,
    list: Option<ListBlock>,
    line: Option<OpenLine>,
    styles: Vec<TextStyle>,
}

impl Builder {
    fn style(&self) -> TextStyle {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, f: impl FnOnce(&mut TextStyle)) {
        let mut style = self.style();
        f(&mut style);
        self.styles.push(style);
    }

    fn in_item(&self) -> bool {
        self.line.as_ref().map(|open| open.item).unwrap_or(false)
    }

    fn open_paragraph(&mut self) {
        self.close_line();
        self.close_list();
        self.line = Some(OpenLine {
            line: Line::default(),
            item: false,
            after_break: false,
        });
    }

    fn open_item(&mut self) {
        self.close_line();
        if self.list.is_none() {
            self.list = Some(ListBlock {
                kind: ListKind::Bullet,
                start: 1,
                items: Vec::new(),
            });
        }
        self.line = Some(OpenLine {
            line: Line::default(),
            item: true,
            after_break: false,
        });
    }

    fn close_line(&mut self) {
        let Some(open) = self.line.take() else {
            return;
        };
        self.styles.clear();
        if open.after_break && open.line.is_empty() {
            return;
        }
        match (&mut self.list, open.item) {
            (Some(list), true) => list.items.push(open.line),
            _ => self.blocks.push(Block::Paragraph(open.line)),
        }
    }

    fn close_list(&mut self) {
        if let Some(list) = self.list.take() {
            self.blocks.push(Block::List(list));
        }
    }

    fn start(&mut self, element: &BytesStart<'_>) -> Result<()> {
        match element.local_name().as_ref() {
            b"p" | b"div" => {
                if !self.in_item() {
                    self.open_paragraph();
                }
            }
            b"ul" | b"ol" => {
                self.close_line();
                self.close_list();
                let kind = if element.local_name().as_ref() == b"ul" {
                    ListKind::Bullet
                } else {
                    ListKind::from_ol_type(attribute(element, "type")?.as_deref())
                };
                let start = attribute(element, "start")?
                    .and_then(|value| value.trim().parse::<u32>().ok())
                    .unwrap_or(1)
                    .max(1);
                self.list = Some(ListBlock {
                    kind,
                    start,
                    items: Vec::new(),
                });
            }
            b"li" => self.open_item(),
            b"b" | b"strong" => self.push_style(|style| style.marks.insert(Marks::BOLD)),
            b"i" | b"em" => self.push_style(|style| style.marks.insert(Marks::ITALIC)),
            b"u" => self.push_style(|style| style.marks.insert(Marks::UNDERLINE)),
            b"span" => {
                let css = attribute(element, "style")?;
                self.push_style(|style| {
                    if let Some(css) = css {
                        style.apply_css(&css);
                    }
                });
            }
            _ => self.push_style(|_| {}),
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"p" | b"div" => {
                if !self.in_item() {
                    self.close_line();
                }
            }
            b"li" => self.close_line(),
            b"ul" | b"ol" => {
                self.close_line();
                self.close_list();
            }
            name if is_void(name) => {}
            _ => {
                self.styles.pop();
            }
        }
    }

    /// `<br>` ends the current paragraph line. Inside a list item it becomes
    /// a space, and in an empty line it only marks the line as blank.
    fn line_break(&mut self) {
        let Some(open) = self.line.as_mut() else {
            self.open_paragraph();
            self.close_line();
            return;
        };
        if open.line.is_empty() {
            return;
        }
        if open.item {
            let style = self.style();
            if let Some(open) = self.line.as_mut() {
                open.line.nodes.push(Inline::Text(TextRun::new(" ", style)));
            }
            return;
        }
        let styles = self.styles.clone();
        self.close_line();
        self.styles = styles;
        self.line = Some(OpenLine {
            line: Line::default(),
            item: false,
            after_break: true,
        });
    }

    fn empty(&mut self, element: &BytesStart<'_>) -> Result<()> {
        match element.local_name().as_ref() {
            b"img" => {
                if let Some(image) = parse_image(element)? {
                    if self.line.is_none() {
                        self.open_paragraph();
                    }
                    if let Some(open) = self.line.as_mut() {
                        open.line.nodes.push(Inline::Image(image));
                    }
                }
            }
            b"p" | b"div" => {
                self.open_paragraph();
                self.close_line();
            }
            b"li" => {
                self.open_item();
                self.close_line();
            }
            b"br" => self.line_break(),
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if self.line.is_none() {
            if text.trim().is_empty() {
                return;
            }
            self.open_paragraph();
        }
        let style = self.style();
        if let Some(open) = self.line.as_mut() {
            open.line.nodes.push(Inline::Text(TextRun::new(text, style)));
        }
    }

    fn finish(mut self) -> Document {
        self.close_line();
        self.close_list();
        Document::from_blocks(self.blocks)
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(markup_error)?;
        if attr.key.as_ref() == name.as_bytes() {
            let raw = String::from_utf8_lossy(&attr.value);
            return Ok(Some(decode_entities(&raw).into_owned()));
        }
    }
    Ok(None)
}

fn parse_image(element: &BytesStart<'_>) -> Result<Option<ImageNode>> {
    let Some(src) = attribute(element, "src")?.filter(|src| !src.is_empty()) else {
        return Ok(None);
    };
    let dimension = |name: &str| -> Result<Option<u32>> {
        Ok(attribute(element, name)?
            .and_then(|value| value.trim().trim_end_matches("px").parse::<u32>().ok())
            .filter(|value| *value > 0))
    };
    let width = dimension("width")?;
    let height = dimension("height")?;
    let natural_width = dimension("data-natural-width")?.or(width);
    let natural_height = dimension("data-natural-height")?.or(height);
    let (Some(natural_width), Some(natural_height)) = (natural_width, natural_height) else {
        tracing::debug!(%src, "skipping image without dimensions");
        return Ok(None);
    };
    let mut image = ImageNode {
        id: ImageId::fresh(),
        src,
        alt: attribute(element, "alt")?.unwrap_or_default(),
        width: width.unwrap_or(natural_width),
        height: 0,
        natural_width,
        natural_height,
    };
    image.height = height.unwrap_or_else(|| image.height_for(image.width));
    Ok(Some(image))
}
