use bitflags::bitflags;
use strum::{Display, EnumIter, IntoEnumIterator};

bitflags! {
    /// Character-level toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Marks: u8 {
        const BOLD = 0b001;
        const ITALIC = 0b010;
        const UNDERLINE = 0b100;
    }
}

/// The three toolbar flags, recomputed from the document after every command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFormats {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl From<Marks> for ActiveFormats {
    fn from(marks: Marks) -> Self {
        Self {
            bold: marks.contains(Marks::BOLD),
            italic: marks.contains(Marks::ITALIC),
            underline: marks.contains(Marks::UNDERLINE),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum FontSize {
    #[strum(serialize = "Small")]
    Small,
    #[default]
    #[strum(serialize = "Normal")]
    Normal,
    #[strum(serialize = "Medium")]
    Medium,
    #[strum(serialize = "Large")]
    Large,
    #[strum(serialize = "X-Large")]
    XLarge,
    #[strum(serialize = "XX-Large")]
    XxLarge,
}

impl FontSize {
    pub fn css(self) -> &'static str {
        match self {
            FontSize::Small => "x-small",
            FontSize::Normal => "medium",
            FontSize::Medium => "large",
            FontSize::Large => "x-large",
            FontSize::XLarge => "xx-large",
            FontSize::XxLarge => "xxx-large",
        }
    }

    pub fn from_css(value: &str) -> Option<Self> {
        FontSize::iter().find(|size| size.css().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum TextColor {
    #[strum(serialize = "Black")]
    Black,
    #[strum(serialize = "Dark Gray")]
    DarkGray,
    #[strum(serialize = "Gray")]
    Gray,
    #[strum(serialize = "Red")]
    Red,
    #[strum(serialize = "Orange")]
    Orange,
    #[strum(serialize = "Yellow")]
    Yellow,
    #[strum(serialize = "Green")]
    Green,
    #[strum(serialize = "Blue")]
    Blue,
    #[strum(serialize = "Indigo")]
    Indigo,
    #[strum(serialize = "Purple")]
    Purple,
    #[strum(serialize = "Pink")]
    Pink,
    #[strum(serialize = "Teal")]
    Teal,
}

impl TextColor {
    pub fn hex(self) -> &'static str {
        match self {
            TextColor::Black => "#000000",
            TextColor::DarkGray => "#374151",
            TextColor::Gray => "#6B7280",
            TextColor::Red => "#EF4444",
            TextColor::Orange => "#F97316",
            TextColor::Yellow => "#EAB308",
            TextColor::Green => "#22C55E",
            TextColor::Blue => "#3B82F6",
            TextColor::Indigo => "#6366F1",
            TextColor::Purple => "#A855F7",
            TextColor::Pink => "#EC4899",
            TextColor::Teal => "#14B8A6",
        }
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        TextColor::iter().find(|color| color.hex().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum HighlightColor {
    #[default]
    #[strum(serialize = "None")]
    None,
    #[strum(serialize = "Yellow")]
    Yellow,
    #[strum(serialize = "Green")]
    Green,
    #[strum(serialize = "Blue")]
    Blue,
    #[strum(serialize = "Purple")]
    Purple,
    #[strum(serialize = "Pink")]
    Pink,
    #[strum(serialize = "Orange")]
    Orange,
    #[strum(serialize = "Red")]
    Red,
    #[strum(serialize = "Gray")]
    Gray,
}

impl HighlightColor {
    pub fn css(self) -> &'static str {
        match self {
            HighlightColor::None => "transparent",
            HighlightColor::Yellow => "#FEF08A",
            HighlightColor::Green => "#BBF7D0",
            HighlightColor::Blue => "#BFDBFE",
            HighlightColor::Purple => "#DDD6FE",
            HighlightColor::Pink => "#FBCFE8",
            HighlightColor::Orange => "#FED7AA",
            HighlightColor::Red => "#FECACA",
            HighlightColor::Gray => "#E5E7EB",
        }
    }

    pub fn from_css(value: &str) -> Option<Self> {
        HighlightColor::iter().find(|color| color.css().eq_ignore_ascii_case(value.trim()))
    }
}

/// Everything a text run can carry. The default is plain text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextStyle {
    pub marks: Marks,
    pub size: FontSize,
    pub color: Option<TextColor>,
    pub highlight: HighlightColor,
}

impl TextStyle {
    pub fn is_plain(&self) -> bool {
        *self == TextStyle::default()
    }

    /// Inline CSS for the non-mark attributes, empty when there is none.
    pub fn css(&self) -> String {
        let mut parts = Vec::new();
        if self.size != FontSize::Normal {
            parts.push(format!("font-size: {}", self.size.css()));
        }
        if let Some(color) = self.color {
            parts.push(format!("color: {}", color.hex()));
        }
        if self.highlight != HighlightColor::None {
            parts.push(format!("background-color: {}", self.highlight.css()));
        }
        parts.join("; ")
    }

    /// Applies a `style="..."` attribute on top of `self`; unknown declarations are ignored.
    pub fn apply_css(&mut self, css: &str) {
        for declaration in css.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            match property.trim().to_ascii_lowercase().as_str() {
                "font-size" => {
                    if let Some(size) = FontSize::from_css(value) {
                        self.size = size;
                    }
                }
                "color" => self.color = TextColor::from_hex(value),
                "background-color" => {
                    self.highlight = HighlightColor::from_css(value).unwrap_or_default();
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ListKind {
    #[strum(serialize = "Bullet")]
    Bullet,
    #[strum(serialize = "Numbered")]
    Decimal,
    #[strum(serialize = "a, b, c")]
    LowerAlpha,
    #[strum(serialize = "A, B, C")]
    UpperAlpha,
}

impl ListKind {
    pub fn is_ordered(self) -> bool {
        !matches!(self, ListKind::Bullet)
    }

    /// `type` attribute of the `<ol>` element, if any.
    pub fn ol_type(self) -> Option<&'static str> {
        match self {
            ListKind::LowerAlpha => Some("a"),
            ListKind::UpperAlpha => Some("A"),
            ListKind::Bullet | ListKind::Decimal => None,
        }
    }

    pub fn from_ol_type(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("a") => ListKind::LowerAlpha,
            Some("A") => ListKind::UpperAlpha,
            _ => ListKind::Decimal,
        }
    }

    /// Rendered marker for the item at `number` (1-based), as a browser would draw it.
    pub fn marker(self, number: u32) -> String {
        match self {
            ListKind::Bullet => "•".to_string(),
            ListKind::Decimal => format!("{number}."),
            ListKind::LowerAlpha => format!("{}.", alpha_label(number).to_lowercase()),
            ListKind::UpperAlpha => format!("{}.", alpha_label(number)),
        }
    }
}

fn alpha_label(mut number: u32) -> String {
    if number == 0 {
        return "0".to_string();
    }
    let mut label = Vec::new();
    while number > 0 {
        number -= 1;
        label.push(char::from(b'A' + (number % 26) as u8));
        number /= 26;
    }
    label.iter().rev().collect()
}
