/// Placement of an intrinsic video frame inside a display surface using a
/// "contain" fit: aspect ratio preserved, padding on one axis only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxFit {
    pub render_width: f32,
    pub render_height: f32,
    pub x_offset: f32,
    pub y_offset: f32,
}

impl LetterboxFit {
    /// Returns `None` while either rectangle has no area (no decodable geometry
    /// yet, or a collapsed surface).
    pub fn contain(intrinsic: (u32, u32), surface: (u32, u32)) -> Option<Self> {
        let (video_w, video_h) = intrinsic;
        let (surface_w, surface_h) = surface;
        if video_w == 0 || video_h == 0 || surface_w == 0 || surface_h == 0 {
            return None;
        }

        let surface_w = surface_w as f32;
        let surface_h = surface_h as f32;
        let video_aspect = video_w as f32 / video_h as f32;
        let surface_aspect = surface_w / surface_h;

        let fit = if video_aspect > surface_aspect {
            // Width-constrained: bars above and below
            let render_height = surface_w / video_aspect;
            Self {
                render_width: surface_w,
                render_height,
                x_offset: 0.0,
                y_offset: (surface_h - render_height) / 2.0,
            }
        } else {
            // Height-constrained: bars left and right
            let render_width = surface_h * video_aspect;
            Self {
                render_width,
                render_height: surface_h,
                x_offset: (surface_w - render_width) / 2.0,
                y_offset: 0.0,
            }
        };
        Some(fit)
    }

    /// Normalized source coordinates to surface coordinates.
    pub fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.render_width + self.x_offset,
            y * self.render_height + self.y_offset,
        )
    }

    /// Inverse of [`map`](Self::map). `None` for points in the bars.
    pub fn unmap(&self, px: f32, py: f32) -> Option<(f32, f32)> {
        let x = (px - self.x_offset) / self.render_width;
        let y = (py - self.y_offset) / self.render_height;
        ((0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y)).then_some((x, y))
    }
}
