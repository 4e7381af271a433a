//! Rich-text note editor.
//!
//! The document is an explicit tree ([`Document`]) and every command takes the
//! selection it applies to. Formatting state is never stored: the toolbar asks
//! [`Editor::active_formats`] after each command or selection change.

mod document;
mod image;
mod markup;
mod selection;
mod style;

pub use document::{Block, Document, Inline, Line, ListBlock, TextRun};
pub use image::{ImageId, ImageNode, ImageSource, ResizeHandle};
pub use markup::IMAGE_CLASS;
pub use selection::{Caret, Selection};
pub use style::{ActiveFormats, FontSize, HighlightColor, ListKind, Marks, TextColor, TextStyle};

use crate::config::EditorConfig;
use document::ListTag;

/// Group id for lines wrapped by a list command; block indices never reach it.
const NEW_LIST_GROUP: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingStyle {
    at: Caret,
    style: TextStyle,
}

/// Inline numeric input opened over an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListStartInput {
    line: usize,
    original: u32,
    pub value: String,
}

impl ListStartInput {
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn original(&self) -> u32 {
        self.original
    }

    /// Escape: drops the input and returns the untouched start value.
    pub fn cancel(self) -> u32 {
        self.original
    }
}

#[derive(Debug, Clone)]
pub struct Editor {
    doc: Document,
    settings: EditorConfig,
    pending: Option<PendingStyle>,
    dirty: bool,
    history: Vec<Document>,
    history_index: usize,
    /// History entry matching the last saved document, if it is still kept.
    clean_index: Option<usize>,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl Editor {
    pub fn new(settings: EditorConfig) -> Self {
        Self::with_document(Document::new(), settings)
    }

    /// Loads stored content; anything that is not valid markup becomes plain paragraphs.
    pub fn from_markup(markup: &str, settings: EditorConfig) -> Self {
        Self::with_document(Document::from_markup_lenient(markup), settings)
    }

    pub fn with_document(doc: Document, settings: EditorConfig) -> Self {
        let mut history = Vec::with_capacity(32);
        history.push(doc.clone());
        Self {
            doc,
            settings,
            pending: None,
            dirty: false,
            history,
            history_index: 0,
            clean_index: Some(0),
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn settings(&self) -> &EditorConfig {
        &self.settings
    }

    pub fn to_markup(&self) -> String {
        self.doc.to_markup()
    }

    pub fn plain_text(&self) -> String {
        self.doc.plain_text()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.history.clear();
        self.history.push(self.doc.clone());
        self.history_index = 0;
        self.clean_index = Some(0);
    }

    pub fn image(&self, id: ImageId) -> Option<&ImageNode> {
        let at = self.doc.find_image(id)?;
        self.doc.line(at.line)?.image_at(at.offset)
    }

    pub fn active_formats(&self, selection: Option<Selection>) -> ActiveFormats {
        let Some(selection) = self.checked(selection) else {
            return ActiveFormats::default();
        };
        if selection.is_collapsed() {
            return self.caret_style(selection.focus).marks.into();
        }
        let styles = self.selected_styles(selection);
        if styles.is_empty() {
            return ActiveFormats::default();
        }
        styles
            .iter()
            .fold(Marks::all(), |shared, style| shared & style.marks)
            .into()
    }

    pub fn toggle_mark(&mut self, selection: Option<Selection>, mark: Marks) -> bool {
        let Some(selection) = self.checked(selection) else {
            return false;
        };
        if selection.is_collapsed() {
            self.restyle_caret(selection.focus, |style| style.marks.toggle(mark));
            return false;
        }
        let styles = self.selected_styles(selection);
        if styles.is_empty() {
            return false;
        }
        let remove = styles.iter().all(|style| style.marks.contains(mark));
        self.restyle_selection(selection, |style| style.marks.set(mark, !remove))
    }

    pub fn set_font_size(&mut self, selection: Option<Selection>, size: FontSize) -> bool {
        self.apply_style(selection, move |style| style.size = size)
    }

    pub fn set_text_color(&mut self, selection: Option<Selection>, color: Option<TextColor>) -> bool {
        self.apply_style(selection, move |style| style.color = color)
    }

    pub fn set_highlight(&mut self, selection: Option<Selection>, highlight: HighlightColor) -> bool {
        self.apply_style(selection, move |style| style.highlight = highlight)
    }

    /// Resets character formatting inside the selection; blocks and images are untouched.
    pub fn clear_formatting(&mut self, selection: Option<Selection>) -> bool {
        self.apply_style(selection, |style| *style = TextStyle::default())
    }

    /// `None` reverts the touched lines to paragraphs. Applying the kind every
    /// touched line already has does the same.
    pub fn set_list_style(&mut self, selection: Option<Selection>, kind: Option<ListKind>) -> bool {
        let Some(selection) = self.checked(selection) else {
            return false;
        };
        let (first, last) = (selection.start().line, selection.end().line);
        let mut flat = self.doc.flatten();
        let touched = &flat[first..=last];
        let already = kind.is_some() && touched.iter().all(|line| line.list.map(|tag| tag.kind) == kind);
        let target = if already { None } else { kind };

        // replacing exactly one whole list keeps its numbering
        let start = match touched.first().and_then(|line| line.list) {
            Some(tag)
                if touched.iter().all(|line| line.list.map(|t| t.group) == Some(tag.group))
                    && flat.iter().filter(|line| line.list.map(|t| t.group) == Some(tag.group)).count()
                        == touched.len() =>
            {
                tag.start
            }
            _ => 1,
        };

        for line in &mut flat[first..=last] {
            line.list = target.map(|kind| ListTag {
                group: NEW_LIST_GROUP,
                kind,
                start,
            });
        }
        self.doc = Document::from_flat(flat);
        self.commit()
    }

    /// Opens the start-value input for the ordered list containing `line`.
    pub fn open_list_start(&self, line: usize) -> Option<ListStartInput> {
        let (_, list) = self.doc.list_of_line(line)?;
        if !list.kind.is_ordered() {
            return None;
        }
        Some(ListStartInput {
            line,
            original: list.start,
            value: list.start.to_string(),
        })
    }

    /// Blur or Enter. Text that is not a number of at least 1 cancels.
    pub fn commit_list_start(&mut self, input: ListStartInput) -> bool {
        let Some(value) = input.value.trim().parse::<u32>().ok().filter(|value| *value >= 1) else {
            tracing::debug!(value = %input.value, "ignoring invalid list start");
            return false;
        };
        let Some((block, _)) = self.doc.list_of_line(input.line) else {
            return false;
        };
        match self.doc.list_mut(block) {
            Some(list) if list.kind.is_ordered() => list.start = value,
            _ => return false,
        }
        self.commit()
    }

    /// Drops `dragged` immediately before `target`; both must be items of one list.
    pub fn move_list_item(&mut self, dragged: usize, target: usize) -> bool {
        let (Some((block, _)), Some((target_block, _))) =
            (self.doc.list_of_line(dragged), self.doc.list_of_line(target))
        else {
            return false;
        };
        if block != target_block || dragged == target || dragged + 1 == target {
            return false;
        }
        let first = self.doc.first_line_of(block);
        let (from, to) = (dragged - first, target - first);
        let Some(list) = self.doc.list_mut(block) else {
            return false;
        };
        let item = list.items.remove(from);
        let to = if from < to { to - 1 } else { to };
        list.items.insert(to, item);
        self.commit()
    }

    /// Inserts `text` at `caret`; newlines split the line. Returns the caret after it.
    pub fn insert_text(&mut self, caret: Caret, text: &str) -> Option<Caret> {
        if !self.doc.contains(caret) {
            return None;
        }
        let style = self.caret_style(caret);
        let mut at = caret;
        for (index, segment) in text.split('\n').enumerate() {
            if index > 0 {
                at = self.split_line(at);
            }
            at = self.insert_run(at, segment.trim_end_matches('\r'), style);
        }
        self.commit();
        Some(at)
    }

    /// Enter. On an empty list item this leaves the list instead.
    pub fn insert_line_break(&mut self, caret: Caret) -> Option<Caret> {
        if !self.doc.contains(caret) {
            return None;
        }
        let empty = self.doc.line(caret.line).map(Line::is_empty).unwrap_or(false);
        let at = if empty && self.doc.list_of_line(caret.line).is_some() {
            self.unlist_line(caret.line);
            Caret::new(caret.line, 0)
        } else {
            self.split_line(caret)
        };
        self.commit();
        Some(at)
    }

    pub fn backspace(&mut self, selection: Option<Selection>) -> Option<Caret> {
        let selection = self.checked(selection)?;
        if !selection.is_collapsed() {
            return self.delete_selection(Some(selection));
        }
        let caret = selection.focus;
        let at = if caret.offset > 0 {
            if let Some(line) = self.doc.line_mut(caret.line) {
                line.remove_range(caret.offset - 1, caret.offset);
            }
            Caret::new(caret.line, caret.offset - 1)
        } else if self.doc.list_of_line(caret.line).is_some() {
            self.unlist_line(caret.line);
            caret
        } else if caret.line > 0 {
            self.join_with_next(caret.line - 1)
        } else {
            caret
        };
        self.commit();
        Some(at)
    }

    pub fn delete_forward(&mut self, selection: Option<Selection>) -> Option<Caret> {
        let selection = self.checked(selection)?;
        if !selection.is_collapsed() {
            return self.delete_selection(Some(selection));
        }
        let caret = selection.focus;
        if caret.offset < self.doc.line_len(caret.line) {
            if let Some(line) = self.doc.line_mut(caret.line) {
                line.remove_range(caret.offset, caret.offset + 1);
            }
        } else if caret.line + 1 < self.doc.line_count() {
            self.join_with_next(caret.line);
        }
        self.commit();
        Some(caret)
    }

    pub fn delete_selection(&mut self, selection: Option<Selection>) -> Option<Caret> {
        let selection = self.checked(selection)?;
        if selection.is_collapsed() {
            return Some(selection.focus);
        }
        let (start, end) = (selection.start(), selection.end());
        if start.line == end.line {
            if let Some(line) = self.doc.line_mut(start.line) {
                line.remove_range(start.offset, end.offset);
            }
        } else {
            let tail = self
                .doc
                .line_mut(end.line)
                .map(|line| line.split_off(end.offset))
                .unwrap_or_default();
            for index in (start.line + 1..=end.line).rev() {
                self.doc.remove_line(index);
            }
            if let Some(line) = self.doc.line_mut(start.line) {
                let len = line.len();
                line.remove_range(start.offset, len);
                line.append(tail);
            }
        }
        self.commit();
        Some(start)
    }

    /// Inserts an image at `caret`, scaled down to the content width when wider.
    pub fn insert_image(&mut self, caret: Caret, source: ImageSource) -> Option<ImageId> {
        if !self.doc.contains(caret) || source.src.trim().is_empty() {
            return None;
        }
        let node = ImageNode::new(source, self.settings.content_width);
        let id = node.id;
        self.doc
            .line_mut(caret.line)?
            .insert_nodes(caret.offset, vec![Inline::Image(node)]);
        self.commit();
        Some(id)
    }

    /// Drags `handle` by `(dx, dy)` pixels. Out-of-range sizes clamp silently.
    pub fn resize_image(&mut self, id: ImageId, handle: ResizeHandle, dx: i32, dy: i32) -> bool {
        let (min_width, max_width) = (self.settings.min_image_width, self.settings.content_width);
        let Some(image) = self.doc.image_mut(id) else {
            return false;
        };
        if !image.resize(handle, dx, dy, min_width, max_width) {
            return false;
        }
        self.commit()
    }

    /// Removes the image and re-inserts it at `drop`, a caret in the current document.
    pub fn move_image(&mut self, id: ImageId, drop: Caret) -> bool {
        if !self.doc.contains(drop) {
            return false;
        }
        let Some(from) = self.doc.find_image(id) else {
            return false;
        };
        if drop.line == from.line && (drop.offset == from.offset || drop.offset == from.offset + 1) {
            return false;
        }
        let Some(line) = self.doc.line_mut(from.line) else {
            return false;
        };
        let nodes = line.remove_range(from.offset, from.offset + 1);
        let offset = if drop.line == from.line && drop.offset > from.offset {
            drop.offset - 1
        } else {
            drop.offset
        };
        let Some(target) = self.doc.line_mut(drop.line) else {
            return false;
        };
        target.insert_nodes(offset, nodes);
        self.commit()
    }

    pub fn delete_image(&mut self, id: ImageId) -> bool {
        let Some(at) = self.doc.find_image(id) else {
            return false;
        };
        if let Some(line) = self.doc.line_mut(at.line) {
            line.remove_range(at.offset, at.offset + 1);
        }
        self.commit()
    }

    pub fn undo(&mut self) -> bool {
        if self.history_index == 0 {
            return false;
        }
        self.history_index -= 1;
        self.restore_history_snapshot();
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.history_index + 1 >= self.history.len() {
            return false;
        }
        self.history_index += 1;
        self.restore_history_snapshot();
        true
    }

    fn checked(&self, selection: Option<Selection>) -> Option<Selection> {
        selection.filter(|sel| self.doc.contains(sel.anchor) && self.doc.contains(sel.focus))
    }

    fn caret_style(&self, caret: Caret) -> TextStyle {
        match self.pending {
            Some(pending) if pending.at == caret => pending.style,
            _ => self
                .doc
                .line(caret.line)
                .and_then(|line| line.style_at(caret.offset))
                .unwrap_or_default(),
        }
    }

    fn selected_styles(&self, selection: Selection) -> Vec<TextStyle> {
        selection
            .spans(|line| self.doc.line_len(line))
            .into_iter()
            .filter_map(|(line, from, to)| self.doc.line(line).map(|entry| entry.styles_in(from, to)))
            .flatten()
            .collect()
    }

    fn apply_style(&mut self, selection: Option<Selection>, f: impl Fn(&mut TextStyle)) -> bool {
        let Some(selection) = self.checked(selection) else {
            return false;
        };
        if selection.is_collapsed() {
            self.restyle_caret(selection.focus, f);
            return false;
        }
        self.restyle_selection(selection, f)
    }

    fn restyle_caret(&mut self, caret: Caret, f: impl FnOnce(&mut TextStyle)) {
        let mut style = self.caret_style(caret);
        f(&mut style);
        self.pending = Some(PendingStyle { at: caret, style });
    }

    fn restyle_selection(&mut self, selection: Selection, f: impl Fn(&mut TextStyle)) -> bool {
        let spans = selection.spans(|line| self.doc.line_len(line));
        let mut changed = false;
        for (line, from, to) in spans {
            if let Some(entry) = self.doc.line_mut(line) {
                changed |= entry.restyle(from, to, &f);
            }
        }
        changed && self.commit()
    }

    fn insert_run(&mut self, at: Caret, text: &str, style: TextStyle) -> Caret {
        if text.is_empty() {
            return at;
        }
        let Some(line) = self.doc.line_mut(at.line) else {
            return at;
        };
        let before = line.len();
        line.insert_nodes(at.offset, vec![Inline::Text(TextRun::new(text, style))]);
        Caret::new(at.line, at.offset + line.len().saturating_sub(before))
    }

    fn split_line(&mut self, at: Caret) -> Caret {
        let Some(line) = self.doc.line_mut(at.line) else {
            return at;
        };
        let tail = line.split_off(at.offset);
        line.normalize();
        if self.doc.insert_line_after(at.line, tail) {
            Caret::new(at.line + 1, 0)
        } else {
            at
        }
    }

    /// Appends line `index + 1` to line `index`; returns the caret at the seam.
    fn join_with_next(&mut self, index: usize) -> Caret {
        let seam = Caret::new(index, self.doc.line_len(index));
        if let Some(next) = self.doc.remove_line(index + 1) {
            if let Some(line) = self.doc.line_mut(index) {
                line.append(next);
            }
        }
        seam
    }

    fn unlist_line(&mut self, index: usize) {
        let mut flat = self.doc.flatten();
        if let Some(entry) = flat.get_mut(index) {
            entry.list = None;
        }
        self.doc = Document::from_flat(flat);
    }

    /// Records the document after a command; returns whether it changed.
    fn commit(&mut self) -> bool {
        self.pending = None;
        if self.history.get(self.history_index) == Some(&self.doc) {
            return false;
        }
        self.dirty = true;
        let limit = self.settings.history_limit.max(1);
        self.history.truncate(self.history_index + 1);
        self.clean_index = self.clean_index.filter(|clean| *clean <= self.history_index);
        self.history.push(self.doc.clone());
        if self.history.len() > limit {
            let overflow = self.history.len() - limit;
            self.history.drain(0..overflow);
            self.clean_index = self.clean_index.and_then(|clean| clean.checked_sub(overflow));
        }
        self.history_index = self.history.len() - 1;
        true
    }

    fn restore_history_snapshot(&mut self) {
        if let Some(snapshot) = self.history.get(self.history_index).cloned() {
            self.doc = snapshot;
            self.pending = None;
            self.dirty = self.clean_index != Some(self.history_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(markup: &str) -> Editor {
        Editor::from_markup(markup, EditorConfig::default())
    }

    fn caret(line: usize, offset: usize) -> Option<Selection> {
        Some(Selection::caret(Caret::new(line, offset)))
    }

    #[test]
    fn bold_toggles_by_whole_range() {
        let mut editor = Editor::default();
        editor.insert_text(Caret::default(), "hello world");
        let hello = Some(Selection::within(0, 0, 5));
        assert!(editor.toggle_mark(hello, Marks::BOLD));
        assert!(editor.active_formats(hello).bold);
        assert_eq!(editor.to_markup(), "<p><b>hello</b> world</p>");

        let all = Some(Selection::within(0, 0, 11));
        assert!(!editor.active_formats(all).bold);
        assert!(editor.toggle_mark(all, Marks::BOLD));
        assert_eq!(editor.to_markup(), "<p><b>hello world</b></p>");
        assert!(editor.toggle_mark(all, Marks::BOLD));
        assert_eq!(editor.to_markup(), "<p>hello world</p>");
    }

    #[test]
    fn collapsed_toggle_styles_the_next_typed_text() {
        let mut editor = Editor::default();
        let at = editor.insert_text(Caret::default(), "plain ").expect("caret");
        assert!(!editor.toggle_mark(Some(Selection::caret(at)), Marks::ITALIC));
        assert!(editor.active_formats(Some(Selection::caret(at))).italic);
        let at = editor.insert_text(at, "slanted").expect("caret");
        assert_eq!(editor.to_markup(), "<p>plain <i>slanted</i></p>");
        assert!(editor.active_formats(Some(Selection::caret(at))).italic);
        assert!(!editor.active_formats(caret(0, 3)).italic);
    }

    #[test]
    fn commands_without_a_valid_selection_do_nothing() {
        let mut editor = load("<p>abc</p>");
        assert!(!editor.toggle_mark(None, Marks::BOLD));
        assert!(!editor.toggle_mark(Some(Selection::within(3, 0, 1)), Marks::BOLD));
        assert!(!editor.set_font_size(Some(Selection::within(0, 0, 9)), FontSize::Large));
        assert!(editor.backspace(None).is_none());
        assert_eq!(editor.active_formats(None), ActiveFormats::default());
        assert!(!editor.is_dirty());
    }

    #[test]
    fn palette_commands_apply_inside_the_range() {
        let mut editor = load("<p>colour me</p>");
        let sel = Some(Selection::within(0, 0, 6));
        assert!(editor.set_text_color(sel, Some(TextColor::Blue)));
        assert!(editor.set_highlight(sel, HighlightColor::Yellow));
        assert_eq!(
            editor.to_markup(),
            r#"<p><span style="color: #3B82F6; background-color: #FEF08A">colour</span> me</p>"#
        );
        assert!(editor.set_highlight(sel, HighlightColor::None));
        assert!(editor.set_text_color(sel, None));
        assert_eq!(editor.to_markup(), "<p>colour me</p>");
    }

    #[test]
    fn clear_formatting_touches_only_the_selection() {
        let mut editor = load("<ul><li><b>bold</b> <i>it</i></li></ul>");
        assert!(editor.clear_formatting(Some(Selection::within(0, 0, 2))));
        assert_eq!(editor.to_markup(), "<ul><li>bo<b>ld</b> <i>it</i></li></ul>");
    }

    #[test]
    fn list_styles_are_exclusive_and_toggle_off() {
        let mut editor = load("<p>one</p><p>two</p><p>three</p>");
        let sel = Some(Selection::range(Caret::new(0, 1), Caret::new(1, 0)));
        assert!(editor.set_list_style(sel, Some(ListKind::Bullet)));
        assert_eq!(editor.to_markup(), "<ul><li>one</li><li>two</li></ul><p>three</p>");
        assert!(editor.set_list_style(sel, Some(ListKind::LowerAlpha)));
        assert_eq!(
            editor.to_markup(),
            r#"<ol type="a"><li>one</li><li>two</li></ol><p>three</p>"#
        );
        assert!(editor.set_list_style(sel, Some(ListKind::LowerAlpha)));
        assert_eq!(editor.to_markup(), "<p>one</p><p>two</p><p>three</p>");
        assert!(!editor.set_list_style(sel, None));
    }

    #[test]
    fn restyling_part_of_a_list_splits_it() {
        let mut editor = load("<ol start=\"5\"><li>a</li><li>b</li><li>c</li></ol>");
        assert!(editor.set_list_style(caret(1, 0), Some(ListKind::Bullet)));
        assert_eq!(
            editor.to_markup(),
            "<ol start=\"5\"><li>a</li></ol><ul><li>b</li></ul><ol><li>c</li></ol>"
        );
    }

    #[test]
    fn list_start_input_commits_or_cancels() {
        let mut editor = load("<ol><li>a</li><li>b</li></ol>");
        assert!(editor.open_list_start(5).is_none());
        let mut input = editor.open_list_start(1).expect("ordered list");
        assert_eq!(input.value, "1");
        input.value = "7".into();
        assert!(editor.commit_list_start(input));
        assert_eq!(editor.to_markup(), r#"<ol start="7"><li>a</li><li>b</li></ol>"#);

        for bad in ["0", "abc", "-3", ""] {
            let mut input = editor.open_list_start(0).expect("ordered list");
            input.value = bad.into();
            assert!(!editor.commit_list_start(input), "accepted {bad:?}");
        }
        let input = editor.open_list_start(0).expect("ordered list");
        assert_eq!(input.cancel(), 7);
        assert_eq!(editor.to_markup(), r#"<ol start="7"><li>a</li><li>b</li></ol>"#);

        assert!(load("<ul><li>a</li></ul>").open_list_start(0).is_none());
    }

    #[test]
    fn dragged_item_lands_before_target() {
        let mut editor = load("<ul><li>a</li><li>b</li><li>c</li></ul><p>x</p>");
        assert!(editor.move_list_item(2, 0));
        assert_eq!(editor.to_markup(), "<ul><li>c</li><li>a</li><li>b</li></ul><p>x</p>");
        assert!(!editor.move_list_item(0, 1));
        assert!(!editor.move_list_item(0, 3));
        assert!(editor.move_list_item(0, 2));
        assert_eq!(editor.to_markup(), "<ul><li>a</li><li>c</li><li>b</li></ul><p>x</p>");
    }

    #[test]
    fn images_clamp_and_delete_atomically() {
        let mut editor = Editor::default();
        editor.insert_text(Caret::default(), "ab");
        let source = ImageSource::from_url("pic.png", "pic", 1600, 800).expect("source");
        let id = editor.insert_image(Caret::new(0, 1), source).expect("inserted");
        assert_eq!(editor.image(id).map(|i| (i.width, i.height)), Some((800, 400)));

        assert!(editor.resize_image(id, ResizeHandle::East, -2000, 0));
        assert_eq!(editor.image(id).map(|i| i.width), Some(50));
        assert!(!editor.resize_image(id, ResizeHandle::East, -10, 0));

        let at = editor.backspace(caret(0, 2)).expect("caret");
        assert_eq!(at, Caret::new(0, 1));
        assert!(editor.image(id).is_none());
        assert!(!editor.to_markup().contains(IMAGE_CLASS));
        assert_eq!(editor.to_markup(), "<p>ab</p>");
    }

    #[test]
    fn delete_key_and_delete_image_remove_the_whole_container() {
        let mut editor = load("<p>ab</p>");
        let source = ImageSource::from_url("pic.png", "", 100, 100).expect("source");
        let id = editor.insert_image(Caret::new(0, 1), source.clone()).expect("inserted");
        editor.delete_forward(caret(0, 1));
        assert!(editor.image(id).is_none());
        assert_eq!(editor.to_markup(), "<p>ab</p>");

        let id = editor.insert_image(Caret::new(0, 0), source).expect("inserted");
        assert!(editor.delete_image(id));
        assert!(!editor.delete_image(id));
        assert_eq!(editor.to_markup(), "<p>ab</p>");
    }

    #[test]
    fn non_image_sources_are_not_inserted() {
        let mut editor = Editor::default();
        let refused = ImageSource::from_bytes("doc.pdf", "application/pdf", b"%PDF", 10, 10);
        assert!(refused.is_none());
        let blank = ImageSource {
            src: " ".into(),
            alt: String::new(),
            natural_width: 10,
            natural_height: 10,
        };
        assert!(editor.insert_image(Caret::default(), blank).is_none());
    }

    #[test]
    fn moved_image_is_reinserted_at_drop_point() {
        let mut editor = load("<p>abc</p><p>xyz</p>");
        let source = ImageSource::from_url("pic.png", "", 10, 10).expect("source");
        let id = editor.insert_image(Caret::new(0, 0), source).expect("inserted");

        assert!(!editor.move_image(id, Caret::new(0, 1)));
        assert!(editor.move_image(id, Caret::new(0, 4)));
        assert_eq!(editor.document().find_image(id), Some(Caret::new(0, 3)));
        assert!(editor.move_image(id, Caret::new(1, 1)));
        assert_eq!(editor.document().find_image(id), Some(Caret::new(1, 1)));
        assert_eq!(editor.plain_text(), "abc\nxyz");
        assert!(!editor.move_image(id, Caret::new(9, 0)));
    }

    #[test]
    fn enter_and_backspace_walk_out_of_lists() {
        let mut editor = load("<ul><li>a</li></ul>");
        let at = editor.insert_line_break(Caret::new(0, 1)).expect("caret");
        assert_eq!(editor.to_markup(), "<ul><li>a</li><li><br/></li></ul>");
        let at = editor.insert_line_break(at).expect("caret");
        assert_eq!(editor.to_markup(), "<ul><li>a</li></ul><p><br/></p>");
        editor.insert_text(at, "b");
        assert_eq!(editor.to_markup(), "<ul><li>a</li></ul><p>b</p>");

        let at = editor.backspace(caret(1, 0)).expect("caret");
        assert_eq!(at, Caret::new(0, 1));
        assert_eq!(editor.to_markup(), "<ul><li>ab</li></ul>");
        editor.backspace(caret(0, 0));
        assert_eq!(editor.to_markup(), "<p>ab</p>");
    }

    #[test]
    fn deleting_across_lines_joins_the_ends() {
        let mut editor = load("<p>hello</p><ul><li>one</li><li>two</li></ul>");
        let sel = Selection::range(Caret::new(2, 1), Caret::new(0, 2));
        assert_eq!(editor.delete_selection(Some(sel)), Some(Caret::new(0, 2)));
        assert_eq!(editor.to_markup(), "<p>hewo</p>");
    }

    #[test]
    fn pasted_newlines_split_lines() {
        let mut editor = load("<ul><li>x</li></ul>");
        let at = editor.insert_text(Caret::new(0, 1), "1\r\n\n2").expect("caret");
        assert_eq!(at, Caret::new(2, 1));
        assert_eq!(editor.plain_text(), "x1\n\n2");
        assert_eq!(editor.document().line_count(), 3);
    }

    #[test]
    fn reloaded_markup_edits_like_the_original() {
        let mut original = Editor::default();
        original.insert_text(Caret::default(), "first line\nsecond");
        original.toggle_mark(Some(Selection::within(1, 0, 6)), Marks::UNDERLINE);
        original.set_list_style(caret(1, 0), Some(ListKind::Decimal));
        let saved = original.to_markup();

        let mut reloaded = load(&saved);
        assert_eq!(reloaded.to_markup(), saved);
        for editor in [&mut original, &mut reloaded] {
            editor.insert_text(Caret::new(1, 6), "!");
            editor.set_font_size(Some(Selection::within(0, 0, 5)), FontSize::Large);
        }
        assert_eq!(original.to_markup(), reloaded.to_markup());
    }

    #[test]
    fn undo_redo_track_dirty_state() {
        let mut editor = Editor::default();
        assert!(!editor.is_dirty());
        editor.insert_text(Caret::default(), "a");
        editor.insert_text(Caret::new(0, 1), "b");
        assert!(editor.is_dirty());
        assert!(editor.undo());
        assert_eq!(editor.to_markup(), "<p>a</p>");
        assert!(editor.undo());
        assert_eq!(editor.to_markup(), "<p><br/></p>");
        assert!(!editor.is_dirty());
        assert!(!editor.undo());
        assert!(editor.redo());
        assert_eq!(editor.to_markup(), "<p>a</p>");
        editor.mark_clean();
        assert!(!editor.is_dirty());
        assert!(!editor.undo());
    }

    #[test]
    fn history_is_bounded() {
        let settings = EditorConfig {
            history_limit: 3,
            ..EditorConfig::default()
        };
        let mut editor = Editor::new(settings);
        let mut at = Caret::default();
        for ch in ["a", "b", "c", "d", "e"] {
            at = editor.insert_text(at, ch).expect("caret");
        }
        assert!(editor.undo());
        assert!(editor.undo());
        assert!(!editor.undo());
        assert_eq!(editor.plain_text(), "abc");
    }

    #[test]
    fn undo_past_dropped_history_stays_dirty() {
        let settings = EditorConfig {
            history_limit: 3,
            ..EditorConfig::default()
        };
        let mut editor = Editor::new(settings);
        let mut at = Caret::default();
        for ch in ["a", "b", "c", "d", "e"] {
            at = editor.insert_text(at, ch).expect("caret");
        }
        while editor.undo() {}
        assert_eq!(editor.plain_text(), "abc");
        assert!(editor.is_dirty());

        editor.mark_clean();
        at = editor.insert_text(Caret::new(0, 3), "x").expect("caret");
        editor.insert_text(at, "y");
        assert!(editor.undo());
        assert!(editor.undo());
        assert!(!editor.is_dirty());
        assert!(editor.redo());
        assert!(editor.is_dirty());
    }

    #[test]
    fn branching_from_saved_state_keeps_it_clean() {
        let mut editor = Editor::default();
        editor.insert_text(Caret::default(), "a");
        editor.mark_clean();
        assert!(!editor.undo());
        editor.insert_text(Caret::new(0, 1), "b");
        assert!(editor.undo());
        assert!(!editor.is_dirty());
        editor.insert_text(Caret::new(0, 1), "c");
        assert!(editor.undo());
        assert!(!editor.is_dirty());
        assert!(editor.redo());
        assert!(editor.is_dirty());
    }
}
