//! Panel-space geometry and the off-screen RGB565 surface the screens are
//! composed into.

use embedded_graphics::{
    pixelcolor::{raw::RawU16, Rgb565},
    prelude::*,
    Pixel,
};
use serde::{Deserialize, Serialize};

/// Largest pixel count a single partial-update transfer may carry. The
/// report payload is 4096 bytes and each sample is two bytes.
pub const MAX_UPDATE_AREA: u32 = 2048;

// The refresh header stores width/height as single bytes.
const MAX_SIDE: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u32 {
        self.width as u32 * self.height as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Shrinks width/height so the rect fits inside `max_width` x
    /// `max_height`. Out-of-bounds rects are clamped, never rejected.
    pub fn clamped(&self, max_width: u16, max_height: u16) -> Rect {
        let width = if self.x >= max_width {
            0
        } else {
            self.width.min(max_width - self.x)
        };
        let height = if self.y >= max_height {
            0
        } else {
            self.height.min(max_height - self.y)
        };
        Rect {
            x: self.x,
            y: self.y,
            width,
            height,
        }
    }

    /// Splits the rect into a grid of near-square tiles so that every tile
    /// fits in one update transfer: area at or below `max_area` and neither
    /// side above 255.
    pub fn tiled(&self, max_area: u32) -> Vec<Rect> {
        if self.is_empty() {
            return Vec::new();
        }
        let w = self.width as u32;
        let h = self.height as u32;
        let oversize = w * h > max_area;
        if !oversize && w <= MAX_SIDE && h <= MAX_SIDE {
            return vec![*self];
        }

        // floor(sqrt) as the side basis keeps every tile's area provably
        // at or below max_area
        let side = (max_area as f64).sqrt() as u32;
        let mut cols = if oversize { w.div_ceil(side) } else { 1 };
        let mut rows = if oversize { h.div_ceil(side) } else { 1 };
        cols = cols.max(w.div_ceil(MAX_SIDE));
        rows = rows.max(h.div_ceil(MAX_SIDE));

        let tile_w = w.div_ceil(cols);
        let tile_h = h.div_ceil(rows);

        let mut tiles = Vec::with_capacity((rows * cols) as usize);
        for i in 0..rows {
            for j in 0..cols {
                let ox = j * tile_w;
                let oy = i * tile_h;
                let width = tile_w.min(w - ox);
                let height = tile_h.min(h - oy);
                if width == 0 || height == 0 {
                    continue;
                }
                tiles.push(Rect {
                    x: self.x + ox as u16,
                    y: self.y + oy as u16,
                    width: width as u16,
                    height: height as u16,
                });
            }
        }
        tiles
    }

    /// Maps a rect from portrait widget space onto the landscape-dimensioned
    /// device buffer. `canvas_height` is the landscape canvas height.
    pub fn to_portrait(&self, canvas_height: u16) -> Rect {
        Rect {
            x: self.y,
            y: canvas_height.saturating_sub(self.x + self.width),
            width: self.height,
            height: self.width,
        }
    }
}

/// Owned RGB565 framebuffer in the device's native layout (row-major,
/// landscape dimensions regardless of orientation).
#[derive(Debug, Clone)]
pub struct Surface {
    width: u16,
    height: u16,
    data: Vec<u16>,
}

impl Surface {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn data(&self) -> &[u16] {
        &self.data
    }

    pub fn fill(&mut self, color: Rgb565) {
        let raw = color.into_storage();
        self.data.fill(raw);
    }

    /// Overwrites the whole frame. Short or oversize sources are ignored.
    pub fn blit(&mut self, pixels: &[u16]) {
        if pixels.len() == self.data.len() {
            self.data.copy_from_slice(pixels);
        }
    }

    /// Copies out the samples of a device-space rect, row-major. The rect
    /// must already be clamped to the surface bounds.
    pub fn extract(&self, rect: &Rect) -> Vec<u16> {
        let mut out = Vec::with_capacity(rect.area() as usize);
        for row in 0..rect.height {
            let y = rect.y as usize + row as usize;
            let start = y * self.width as usize + rect.x as usize;
            out.extend_from_slice(&self.data[start..start + rect.width as usize]);
        }
        out
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Rgb565) {
        if x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32 {
            self.data[y as usize * self.width as usize + x as usize] = color.into_storage();
        }
    }
}

impl OriginDimensions for Surface {
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}

impl DrawTarget for Surface {
    type Color = Rgb565;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.set_pixel(point.x, point.y, color);
        }
        Ok(())
    }
}

/// Drawing view over a [`Surface`] that applies the orientation transform.
/// Widgets always draw in their own logical space; in portrait mode pixels
/// land rotated 90 degrees onto the landscape-dimensioned buffer.
pub struct Canvas<'a> {
    surface: &'a mut Surface,
    portrait: bool,
}

impl<'a> Canvas<'a> {
    pub fn new(surface: &'a mut Surface, portrait: bool) -> Self {
        Self { surface, portrait }
    }
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        if self.portrait {
            Size::new(self.surface.height as u32, self.surface.width as u32)
        } else {
            Size::new(self.surface.width as u32, self.surface.height as u32)
        }
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb565;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        if self.portrait {
            let h = self.surface.height as i32;
            for Pixel(point, color) in pixels {
                self.surface.set_pixel(point.y, h - 1 - point.x, color);
            }
        } else {
            for Pixel(point, color) in pixels {
                self.surface.set_pixel(point.x, point.y, color);
            }
        }
        Ok(())
    }
}

pub fn rgb565_from(raw: u16) -> Rgb565 {
    Rgb565::from(RawU16::new(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to_bounds() {
        let rect = Rect::new(300, 160, 40, 30);
        let clamped = rect.clamped(320, 170);
        assert_eq!(clamped, Rect::new(300, 160, 20, 10));

        // fully out of bounds collapses to zero size
        let gone = Rect::new(400, 10, 5, 5).clamped(320, 170);
        assert!(gone.is_empty());
    }

    #[test]
    fn test_small_rect_is_not_tiled() {
        let rect = Rect::new(4, 8, 40, 40);
        assert_eq!(rect.tiled(MAX_UPDATE_AREA), vec![rect]);
    }

    #[test]
    fn test_tiles_cover_exactly_without_overlap() {
        let rect = Rect::new(10, 20, 300, 120);
        let tiles = rect.tiled(MAX_UPDATE_AREA);
        assert!(tiles.len() > 1);

        let mut covered = 0u32;
        for tile in &tiles {
            assert!(tile.area() <= MAX_UPDATE_AREA);
            assert!(tile.x >= rect.x && tile.y >= rect.y);
            assert!(tile.x + tile.width <= rect.x + rect.width);
            assert!(tile.y + tile.height <= rect.y + rect.height);
            covered += tile.area();
        }
        // equal total area + containment + pairwise disjointness = exact cover
        assert_eq!(covered, rect.area());
        for (i, a) in tiles.iter().enumerate() {
            for b in tiles.iter().skip(i + 1) {
                let overlap_x = a.x < b.x + b.width && b.x < a.x + a.width;
                let overlap_y = a.y < b.y + b.height && b.y < a.y + a.height;
                assert!(!(overlap_x && overlap_y), "tiles {a:?} and {b:?} overlap");
            }
        }
    }

    #[test]
    fn test_tile_sides_stay_below_wire_limit() {
        // 320x6 is below the area threshold but too wide for the u8 width
        // field in the refresh header
        let rect = Rect::new(0, 0, 320, 6);
        let tiles = rect.tiled(MAX_UPDATE_AREA);
        assert!(tiles.len() > 1);
        let covered: u32 = tiles.iter().map(Rect::area).sum();
        assert_eq!(covered, rect.area());
        for tile in tiles {
            assert!(tile.width <= 255 && tile.height <= 255);
        }
    }

    #[test]
    fn test_portrait_transform() {
        let rect = Rect::new(10, 5, 20, 8);
        assert_eq!(rect.to_portrait(170), Rect::new(5, 140, 8, 20));
    }

    #[test]
    fn test_extract_rect() {
        let mut surface = Surface::new(4, 3);
        surface.blit(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        let pixels = surface.extract(&Rect::new(1, 1, 2, 2));
        assert_eq!(pixels, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_portrait_canvas_maps_pixels() {
        let mut surface = Surface::new(4, 3);
        {
            let mut canvas = Canvas::new(&mut surface, true);
            // portrait logical space is 3 wide x 4 tall
            assert_eq!(canvas.size(), Size::new(3, 4));
            canvas
                .draw_iter([Pixel(Point::new(0, 0), rgb565_from(0xFFFF))])
                .unwrap();
        }
        // (0, 0) lands on the bottom-left of the landscape buffer
        assert_eq!(surface.extract(&Rect::new(0, 2, 1, 1)), vec![0xFFFF]);
    }
}
