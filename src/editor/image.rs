use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use strum::{Display, EnumIter};
use uuid::Uuid;

/// Identity of an image inside one editing session. Not serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(Uuid);

impl ImageId {
    pub(crate) fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

/// An inserted image together with its resizable container.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageNode {
    pub id: ImageId,
    pub src: String,
    pub alt: String,
    pub width: u32,
    pub height: u32,
    pub natural_width: u32,
    pub natural_height: u32,
}

impl ImageNode {
    pub(crate) fn new(source: ImageSource, max_width: u32) -> Self {
        let mut node = Self {
            id: ImageId::fresh(),
            src: source.src,
            alt: source.alt,
            width: source.natural_width,
            height: source.natural_height,
            natural_width: source.natural_width.max(1),
            natural_height: source.natural_height.max(1),
        };
        if node.width > max_width {
            node.width = max_width.max(1);
        }
        node.height = node.height_for(node.width);
        node
    }

    /// Width over height of the original picture.
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.natural_width) / f64::from(self.natural_height)
    }

    pub(crate) fn height_for(&self, width: u32) -> u32 {
        let height = (f64::from(width) / self.aspect_ratio()).round();
        (height as u32).max(1)
    }

    /// Applies a pointer drag on `handle`. Width is clamped to `[min_width, max_width]`
    /// and height follows the aspect ratio. Returns whether the size changed.
    pub(crate) fn resize(
        &mut self,
        handle: ResizeHandle,
        dx: i32,
        dy: i32,
        min_width: u32,
        max_width: u32,
    ) -> bool {
        let aspect = self.aspect_ratio();
        let width = f64::from(self.width);
        let height = f64::from(self.height);
        let (dx, dy) = (f64::from(dx), f64::from(dy));
        let horizontal = match handle.horizontal() {
            Side::Start => width - dx,
            Side::End => width + dx,
            Side::None => width,
        };
        let vertical = match handle.vertical() {
            Side::Start => (height - dy) * aspect,
            Side::End => (height + dy) * aspect,
            Side::None => width,
        };
        let target = match (handle.horizontal(), handle.vertical()) {
            (Side::None, _) => vertical,
            (_, Side::None) => horizontal,
            // corners follow whichever axis moved further
            _ => {
                if (horizontal - width).abs() >= (vertical - width).abs() {
                    horizontal
                } else {
                    vertical
                }
            }
        };
        if !target.is_finite() {
            return false;
        }
        let lower = f64::from(min_width.max(1));
        let upper = f64::from(max_width.max(1)).max(lower);
        let clamped = target.round().max(lower).min(upper) as u32;
        let new_height = self.height_for(clamped);
        if clamped == self.width && new_height == self.height {
            return false;
        }
        self.width = clamped;
        self.height = new_height;
        true
    }
}

/// Image data ready for insertion, from a file picker, a paste or a drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub src: String,
    pub alt: String,
    pub natural_width: u32,
    pub natural_height: u32,
}

impl ImageSource {
    /// Embeds raw bytes as a `data:` URL. Non-image MIME types and empty pictures are refused.
    pub fn from_bytes(name: &str, mime: &str, bytes: &[u8], width: u32, height: u32) -> Option<Self> {
        if !mime.starts_with("image/") || width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            src: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
            alt: name.to_string(),
            natural_width: width,
            natural_height: height,
        })
    }

    pub fn from_url(url: &str, alt: &str, width: u32, height: u32) -> Option<Self> {
        if url.trim().is_empty() || width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            src: url.to_string(),
            alt: alt.to_string(),
            natural_width: width,
            natural_height: height,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Start,
    End,
    None,
}

/// The eight grips around an image container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ResizeHandle {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl ResizeHandle {
    pub fn is_corner(self) -> bool {
        matches!(
            self,
            ResizeHandle::NorthEast
                | ResizeHandle::SouthEast
                | ResizeHandle::SouthWest
                | ResizeHandle::NorthWest
        )
    }

    fn horizontal(self) -> Side {
        match self {
            ResizeHandle::West | ResizeHandle::NorthWest | ResizeHandle::SouthWest => Side::Start,
            ResizeHandle::East | ResizeHandle::NorthEast | ResizeHandle::SouthEast => Side::End,
            ResizeHandle::North | ResizeHandle::South => Side::None,
        }
    }

    fn vertical(self) -> Side {
        match self {
            ResizeHandle::North | ResizeHandle::NorthEast | ResizeHandle::NorthWest => Side::Start,
            ResizeHandle::South | ResizeHandle::SouthEast | ResizeHandle::SouthWest => Side::End,
            ResizeHandle::East | ResizeHandle::West => Side::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn node(width: u32, height: u32) -> ImageNode {
        let source = ImageSource::from_url("pic.png", "pic", width, height).expect("source");
        ImageNode::new(source, 800)
    }

    #[test]
    fn insertion_clamps_to_content_width() {
        let image = node(1600, 900);
        assert_eq!((image.width, image.height), (800, 450));
    }

    #[test]
    fn edge_handles_derive_the_other_dimension() {
        let mut image = node(400, 200);
        assert!(image.resize(ResizeHandle::East, 100, 0, 50, 800));
        assert_eq!((image.width, image.height), (500, 250));
        assert!(image.resize(ResizeHandle::South, 0, 50, 50, 800));
        assert_eq!((image.width, image.height), (600, 300));
        assert!(image.resize(ResizeHandle::West, 100, 0, 50, 800));
        assert_eq!((image.width, image.height), (500, 250));
        assert!(image.resize(ResizeHandle::North, 0, 50, 50, 800));
        assert_eq!((image.width, image.height), (400, 200));
    }

    #[test]
    fn corners_keep_aspect_ratio() {
        let mut image = node(300, 200);
        assert!(image.resize(ResizeHandle::SouthEast, 30, 100, 50, 800));
        // vertical drag dominates: (200 + 100) * 1.5
        assert_eq!((image.width, image.height), (450, 300));
        assert!(image.resize(ResizeHandle::NorthWest, 150, 0, 50, 800));
        assert_eq!((image.width, image.height), (300, 200));
    }

    #[test]
    fn shrinking_below_minimum_clamps() {
        let mut image = node(200, 100);
        assert!(image.resize(ResizeHandle::East, -500, 0, 50, 800));
        assert_eq!((image.width, image.height), (50, 25));
        // already at the floor: further shrinking is a silent no-op
        assert!(!image.resize(ResizeHandle::East, -10, 0, 50, 800));
        assert_eq!(image.width, 50);
    }

    #[test]
    fn growing_past_content_width_clamps() {
        let mut image = node(700, 350);
        assert!(image.resize(ResizeHandle::SouthEast, 900, 0, 50, 800));
        assert_eq!((image.width, image.height), (800, 400));
        assert!(!image.resize(ResizeHandle::East, 1, 0, 50, 800));
    }

    #[test]
    fn every_handle_moves_something() {
        for handle in ResizeHandle::iter() {
            let mut image = node(400, 400);
            assert!(image.resize(handle, 40, 40, 50, 800) || image.resize(handle, -40, -40, 50, 800),
                "{handle} did not react");
        }
    }

    #[test]
    fn non_images_are_refused() {
        assert!(ImageSource::from_bytes("a.pdf", "application/pdf", b"%PDF", 10, 10).is_none());
        let source = ImageSource::from_bytes("a.png", "image/png", b"\x89PNG", 2, 2).expect("png");
        assert_eq!(source.src, "data:image/png;base64,iVBORw==");
    }
}
