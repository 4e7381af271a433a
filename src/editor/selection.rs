/// A position between two units of a line. `line` indexes paragraphs and list
/// items in document order; `offset` counts grapheme clusters, an image being one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Caret {
    pub line: usize,
    pub offset: usize,
}

impl Caret {
    pub fn new(line: usize, offset: usize) -> Self {
        Self { line, offset }
    }
}

/// Anchor is where the selection started, focus where it ends; either may come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selection {
    pub anchor: Caret,
    pub focus: Caret,
}

impl Selection {
    pub fn caret(at: Caret) -> Self {
        Self {
            anchor: at,
            focus: at,
        }
    }

    pub fn range(anchor: Caret, focus: Caret) -> Self {
        Self { anchor, focus }
    }

    /// Selection inside a single line.
    pub fn within(line: usize, start: usize, end: usize) -> Self {
        Self::range(Caret::new(line, start), Caret::new(line, end))
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn start(&self) -> Caret {
        self.anchor.min(self.focus)
    }

    pub fn end(&self) -> Caret {
        self.anchor.max(self.focus)
    }

    /// Per-line `(line, start, end)` spans; `line_len` reports each line's length.
    pub(crate) fn spans(&self, line_len: impl Fn(usize) -> usize) -> Vec<(usize, usize, usize)> {
        let start = self.start();
        let end = self.end();
        (start.line..=end.line)
            .map(|line| {
                let from = if line == start.line { start.offset } else { 0 };
                let to = if line == end.line {
                    end.offset
                } else {
                    line_len(line)
                };
                (line, from, to)
            })
            .collect()
    }
}
