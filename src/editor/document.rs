use unicode_segmentation::UnicodeSegmentation;

use super::image::{ImageId, ImageNode};
use super::selection::Caret;
use super::style::{ListKind, TextStyle};

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub style: TextStyle,
}

impl TextRun {
    pub fn new(text: impl Into<String>, style: TextStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    pub fn len(&self) -> usize {
        self.text.graphemes(true).count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn byte_index(&self, units: usize) -> usize {
        self.text
            .grapheme_indices(true)
            .nth(units)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text(TextRun),
    Image(ImageNode),
}

impl Inline {
    pub fn len(&self) -> usize {
        match self {
            Inline::Text(run) => run.len(),
            Inline::Image(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A paragraph or a list item: a flat sequence of inline nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    pub(crate) nodes: Vec<Inline>,
}

impl Line {
    pub fn from_text(text: impl Into<String>, style: TextStyle) -> Self {
        let mut line = Self {
            nodes: vec![Inline::Text(TextRun::new(text, style))],
        };
        line.normalize();
        line
    }

    pub fn nodes(&self) -> &[Inline] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().map(Inline::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn plain_text(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Inline::Text(run) => Some(run.text.as_str()),
                Inline::Image(_) => None,
            })
            .collect()
    }

    /// Drops empty runs and merges neighbours that share a style.
    pub(crate) fn normalize(&mut self) {
        let mut merged: Vec<Inline> = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.drain(..) {
            match node {
                Inline::Text(run) if run.is_empty() => {}
                Inline::Text(run) => match merged.last_mut() {
                    Some(Inline::Text(prev)) if prev.style == run.style => {
                        prev.text.push_str(&run.text);
                    }
                    _ => merged.push(Inline::Text(run)),
                },
                image => merged.push(image),
            }
        }
        self.nodes = merged;
    }

    /// Makes `offset` fall between two nodes and returns the index of the node after it.
    pub(crate) fn split_at(&mut self, offset: usize) -> usize {
        let mut position = 0;
        for index in 0..self.nodes.len() {
            if position == offset {
                return index;
            }
            let len = self.nodes[index].len();
            if offset < position + len {
                if let Inline::Text(run) = &mut self.nodes[index] {
                    let at = run.byte_index(offset - position);
                    let tail = run.text.split_off(at);
                    let style = run.style;
                    self.nodes
                        .insert(index + 1, Inline::Text(TextRun::new(tail, style)));
                }
                return index + 1;
            }
            position += len;
        }
        self.nodes.len()
    }

    /// Splits the line at `offset`, keeping the head and returning the tail.
    pub(crate) fn split_off(&mut self, offset: usize) -> Line {
        let index = self.split_at(offset);
        let tail = self.nodes.split_off(index);
        Line { nodes: tail }
    }

    pub(crate) fn append(&mut self, mut other: Line) {
        self.nodes.append(&mut other.nodes);
        self.normalize();
    }

    pub(crate) fn insert_nodes(&mut self, offset: usize, nodes: Vec<Inline>) {
        let index = self.split_at(offset);
        self.nodes.splice(index..index, nodes);
        self.normalize();
    }

    /// Removes the units in `[start, end)` and returns them.
    pub(crate) fn remove_range(&mut self, start: usize, end: usize) -> Vec<Inline> {
        if start >= end {
            return Vec::new();
        }
        let from = self.split_at(start);
        let to = self.split_at(end);
        let removed = self.nodes.drain(from..to).collect();
        self.normalize();
        removed
    }

    /// Calls `f` on each text run style intersecting `[start, end)`; returns whether any changed.
    pub(crate) fn restyle(
        &mut self,
        start: usize,
        end: usize,
        f: &impl Fn(&mut TextStyle),
    ) -> bool {
        if start >= end {
            return false;
        }
        let from = self.split_at(start);
        let to = self.split_at(end);
        let mut changed = false;
        for node in &mut self.nodes[from..to] {
            if let Inline::Text(run) = node {
                let before = run.style;
                f(&mut run.style);
                changed |= before != run.style;
            }
        }
        self.normalize();
        changed
    }

    /// Styles of the text runs intersecting `[start, end)`.
    pub(crate) fn styles_in(&self, start: usize, end: usize) -> Vec<TextStyle> {
        let mut styles = Vec::new();
        let mut position = 0;
        for node in &self.nodes {
            let len = node.len();
            if let Inline::Text(run) = node {
                if position < end && start < position + len {
                    styles.push(run.style);
                }
            }
            position += len;
        }
        styles
    }

    /// Style new text typed at `offset` would inherit: the text before it,
    /// otherwise the text after it.
    pub(crate) fn style_at(&self, offset: usize) -> Option<TextStyle> {
        let mut position = 0;
        let mut after = None;
        for node in &self.nodes {
            let len = node.len();
            if let Inline::Text(run) = node {
                if offset > position && offset <= position + len {
                    return Some(run.style);
                }
                if after.is_none() && position >= offset {
                    after = Some(run.style);
                }
            }
            position += len;
        }
        after
    }

    pub(crate) fn image_offset(&self, id: ImageId) -> Option<usize> {
        let mut position = 0;
        for node in &self.nodes {
            if let Inline::Image(image) = node {
                if image.id == id {
                    return Some(position);
                }
            }
            position += node.len();
        }
        None
    }

    pub(crate) fn image_mut(&mut self, id: ImageId) -> Option<&mut ImageNode> {
        self.nodes.iter_mut().find_map(|node| match node {
            Inline::Image(image) if image.id == id => Some(image),
            _ => None,
        })
    }

    /// The image occupying unit `offset`, if that unit is an image.
    pub(crate) fn image_at(&self, offset: usize) -> Option<&ImageNode> {
        let mut position = 0;
        for node in &self.nodes {
            let len = node.len();
            if offset < position + len {
                return match node {
                    Inline::Image(image) => Some(image),
                    Inline::Text(_) => None,
                };
            }
            position += len;
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListBlock {
    pub kind: ListKind,
    pub start: u32,
    pub items: Vec<Line>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(Line),
    List(ListBlock),
}

/// Where a flat line index lives in the block tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineLoc {
    pub block: usize,
    pub item: Option<usize>,
}

/// A line detached from the tree, with the list it belonged to.
#[derive(Debug, Clone)]
pub(crate) struct FlatLine {
    pub line: Line,
    pub list: Option<ListTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListTag {
    pub group: usize,
    pub kind: ListKind,
    pub start: u32,
}

/// The rich-text document: paragraphs and lists of styled lines.
/// Always holds at least one line and never an empty list.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub(crate) blocks: Vec<Block>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::Paragraph(Line::default())],
        }
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut doc = Self { blocks };
        doc.normalize();
        doc
    }

    /// One paragraph per input line, unstyled.
    pub fn from_plain_text(text: &str) -> Self {
        let blocks = text
            .lines()
            .map(|line| Block::Paragraph(Line::from_text(line, TextStyle::default())))
            .collect();
        Self::from_blocks(blocks)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn line_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| match block {
                Block::Paragraph(_) => 1,
                Block::List(list) => list.items.len(),
            })
            .sum()
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> + '_ {
        self.blocks.iter().flat_map(|block| match block {
            Block::Paragraph(line) => std::slice::from_ref(line).iter(),
            Block::List(list) => list.items.iter(),
        })
    }

    pub fn line(&self, index: usize) -> Option<&Line> {
        let loc = self.locate(index)?;
        match (&self.blocks[loc.block], loc.item) {
            (Block::Paragraph(line), None) => Some(line),
            (Block::List(list), Some(item)) => list.items.get(item),
            _ => None,
        }
    }

    pub(crate) fn line_mut(&mut self, index: usize) -> Option<&mut Line> {
        let loc = self.locate(index)?;
        match (&mut self.blocks[loc.block], loc.item) {
            (Block::Paragraph(line), None) => Some(line),
            (Block::List(list), Some(item)) => list.items.get_mut(item),
            _ => None,
        }
    }

    pub fn line_len(&self, index: usize) -> usize {
        self.line(index).map(Line::len).unwrap_or(0)
    }

    pub fn contains(&self, caret: Caret) -> bool {
        self.line(caret.line)
            .map(|line| caret.offset <= line.len())
            .unwrap_or(false)
    }

    pub fn plain_text(&self) -> String {
        self.lines()
            .map(Line::plain_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_blank(&self) -> bool {
        self.lines().all(Line::is_empty)
    }

    pub(crate) fn locate(&self, index: usize) -> Option<LineLoc> {
        let mut remaining = index;
        for (block, entry) in self.blocks.iter().enumerate() {
            match entry {
                Block::Paragraph(_) => {
                    if remaining == 0 {
                        return Some(LineLoc { block, item: None });
                    }
                    remaining -= 1;
                }
                Block::List(list) => {
                    if remaining < list.items.len() {
                        return Some(LineLoc {
                            block,
                            item: Some(remaining),
                        });
                    }
                    remaining -= list.items.len();
                }
            }
        }
        None
    }

    /// Flat index of the first line of `block`.
    pub(crate) fn first_line_of(&self, block: usize) -> usize {
        self.blocks[..block]
            .iter()
            .map(|entry| match entry {
                Block::Paragraph(_) => 1,
                Block::List(list) => list.items.len(),
            })
            .sum()
    }

    pub(crate) fn list_of_line(&self, index: usize) -> Option<(usize, &ListBlock)> {
        let loc = self.locate(index)?;
        match &self.blocks[loc.block] {
            Block::List(list) => Some((loc.block, list)),
            Block::Paragraph(_) => None,
        }
    }

    pub(crate) fn list_mut(&mut self, block: usize) -> Option<&mut ListBlock> {
        match self.blocks.get_mut(block)? {
            Block::List(list) => Some(list),
            Block::Paragraph(_) => None,
        }
    }

    pub fn find_image(&self, id: ImageId) -> Option<Caret> {
        self.lines().enumerate().find_map(|(line, entry)| {
            entry
                .image_offset(id)
                .map(|offset| Caret::new(line, offset))
        })
    }

    pub(crate) fn image_mut(&mut self, id: ImageId) -> Option<&mut ImageNode> {
        let caret = self.find_image(id)?;
        self.line_mut(caret.line)?.image_mut(id)
    }

    /// Inserts `line` as a sibling right after line `index`: a new item when
    /// `index` is a list item, a new paragraph otherwise.
    pub(crate) fn insert_line_after(&mut self, index: usize, line: Line) -> bool {
        let Some(loc) = self.locate(index) else {
            return false;
        };
        match (&mut self.blocks[loc.block], loc.item) {
            (Block::List(list), Some(item)) => list.items.insert(item + 1, line),
            _ => self.blocks.insert(loc.block + 1, Block::Paragraph(line)),
        }
        true
    }

    /// Detaches line `index` from the tree.
    pub(crate) fn remove_line(&mut self, index: usize) -> Option<Line> {
        let loc = self.locate(index)?;
        let removed = match loc.item {
            None => match self.blocks.remove(loc.block) {
                Block::Paragraph(line) => line,
                Block::List(_) => return None,
            },
            Some(item) => {
                let Block::List(list) = &mut self.blocks[loc.block] else {
                    return None;
                };
                list.items.remove(item)
            }
        };
        self.normalize();
        Some(removed)
    }

    pub(crate) fn flatten(&self) -> Vec<FlatLine> {
        let mut flat = Vec::with_capacity(self.line_count());
        for (group, block) in self.blocks.iter().enumerate() {
            match block {
                Block::Paragraph(line) => flat.push(FlatLine {
                    line: line.clone(),
                    list: None,
                }),
                Block::List(list) => {
                    for item in &list.items {
                        flat.push(FlatLine {
                            line: item.clone(),
                            list: Some(ListTag {
                                group,
                                kind: list.kind,
                                start: list.start,
                            }),
                        });
                    }
                }
            }
        }
        flat
    }

    /// Rebuilds the tree from flat lines. Consecutive lines of one group form a
    /// list; when a group was split, only its first fragment keeps the start value.
    pub(crate) fn from_flat(flat: Vec<FlatLine>) -> Self {
        let mut blocks = Vec::new();
        let mut open: Option<(usize, ListBlock)> = None;
        let mut seen_groups = Vec::new();
        for entry in flat {
            match entry.list {
                Some(tag) => {
                    if let Some((group, list)) = open.as_mut() {
                        if *group == tag.group {
                            list.items.push(entry.line);
                            continue;
                        }
                    }
                    if let Some((_, list)) = open.take() {
                        blocks.push(Block::List(list));
                    }
                    let start = if seen_groups.contains(&tag.group) {
                        1
                    } else {
                        seen_groups.push(tag.group);
                        tag.start
                    };
                    open = Some((
                        tag.group,
                        ListBlock {
                            kind: tag.kind,
                            start,
                            items: vec![entry.line],
                        },
                    ));
                }
                None => {
                    if let Some((_, list)) = open.take() {
                        blocks.push(Block::List(list));
                    }
                    blocks.push(Block::Paragraph(entry.line));
                }
            }
        }
        if let Some((_, list)) = open.take() {
            blocks.push(Block::List(list));
        }
        Self::from_blocks(blocks)
    }

    pub(crate) fn normalize(&mut self) {
        self.blocks.retain(|block| match block {
            Block::List(list) => !list.items.is_empty(),
            Block::Paragraph(_) => true,
        });
        for block in &mut self.blocks {
            match block {
                Block::Paragraph(line) => line.normalize(),
                Block::List(list) => {
                    list.start = list.start.max(1);
                    list.items.iter_mut().for_each(Line::normalize);
                }
            }
        }
        if self.blocks.is_empty() {
            self.blocks.push(Block::Paragraph(Line::default()));
        }
    }
}
