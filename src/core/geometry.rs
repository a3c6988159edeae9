// Fixed 4K comparison layout and the cover-crop math shared by the
// compositor and the footer band.

/// Output canvas width.
pub const CANVAS_WIDTH: u32 = 3840;
/// Output canvas height.
pub const CANVAS_HEIGHT: u32 = 2160;
/// Width of each image slot.
pub const SLOT_WIDTH: u32 = 1915;
/// Width of the dark gutter between the slots.
pub const GUTTER_WIDTH: u32 = 10;
/// Share of the slot height reserved for the synthesized footer.
pub const FOOTER_RATIO: f32 = 0.12;

/// Axis-aligned rectangle in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Split off the bottom `height` rows, returning `(top, bottom)`.
    pub fn split_bottom(&self, height: u32) -> (Rect, Rect) {
        let height = height.min(self.height);
        let top = Rect::new(self.x, self.y, self.width, self.height - height);
        let bottom = Rect::new(self.x, top.bottom(), self.width, height);
        (top, bottom)
    }
}

/// Which side of the comparison a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// The two image slots and the gutter of the fixed canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonLayout {
    pub left: Rect,
    pub gutter: Rect,
    pub right: Rect,
}

impl ComparisonLayout {
    pub fn standard() -> Self {
        let left = Rect::new(0, 0, SLOT_WIDTH, CANVAS_HEIGHT);
        let gutter = Rect::new(left.right(), 0, GUTTER_WIDTH, CANVAS_HEIGHT);
        let right = Rect::new(gutter.right(), 0, SLOT_WIDTH, CANVAS_HEIGHT);
        Self {
            left,
            gutter,
            right,
        }
    }

    pub fn slot(&self, side: Side) -> Rect {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Height of the synthesized footer for a slot of the given height.
pub fn footer_height(slot_height: u32) -> u32 {
    (slot_height as f32 * FOOTER_RATIO).round() as u32
}

/// Source region to sample so that it covers a `dest_w` x `dest_h` target
/// without stretching.
///
/// The source is scaled by the larger of the two axis ratios and the
/// overflow is cropped evenly from both ends of the other axis.
pub fn cover_crop(src_w: u32, src_h: u32, dest_w: u32, dest_h: u32) -> Rect {
    if src_w == 0 || src_h == 0 || dest_w == 0 || dest_h == 0 {
        return Rect::new(0, 0, src_w, src_h);
    }

    let scale = f64::max(
        dest_w as f64 / src_w as f64,
        dest_h as f64 / src_h as f64,
    );
    let crop_w = ((dest_w as f64 / scale).round() as u32).clamp(1, src_w);
    let crop_h = ((dest_h as f64 / scale).round() as u32).clamp(1, src_h);

    Rect::new((src_w - crop_w) / 2, (src_h - crop_h) / 2, crop_w, crop_h)
}
