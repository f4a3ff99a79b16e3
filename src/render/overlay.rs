use crate::pose::{landmark_at, Landmark};
use crate::render::letterbox::LetterboxFit;
use crate::render::skeleton::{BONE_COLOR, JOINT_COLOR, JOINT_RADIUS, OPAQUE, POSE_CONNECTIONS, TRANSPARENT};

/// Default visibility threshold for drawing joints and bones
pub const DEFAULT_VISIBILITY_THRESHOLD: f32 = 0.5;

/// Skeleton geometry in surface coordinates, ready to rasterize.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayScene {
    pub bones: Vec<((f32, f32), (f32, f32))>,
    pub joints: Vec<(f32, f32)>,
}

impl OverlayScene {
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty() && self.joints.is_empty()
    }
}

/// Maps visible landmarks through the letterbox fit.
///
/// A bone is kept only when both endpoints are strictly above `threshold`;
/// connections that point past the end of a short landmark sequence are skipped.
pub fn plan_scene(landmarks: &[Landmark], fit: &LetterboxFit, threshold: f32) -> OverlayScene {
    let bones = POSE_CONNECTIONS
        .iter()
        .filter_map(|&(start, end)| {
            let a = landmark_at(landmarks, start)?;
            let b = landmark_at(landmarks, end)?;
            (a.is_visible(threshold) && b.is_visible(threshold)).then(|| (fit.map(a.x, a.y), fit.map(b.x, b.y)))
        })
        .collect();

    let joints = landmarks
        .iter()
        .filter(|lm| lm.is_visible(threshold))
        .map(|lm| fit.map(lm.x, lm.y))
        .collect();

    OverlayScene { bones, joints }
}

/// ARGB framebuffer the overlay draws into. Undrawn pixels are fully transparent.
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl OverlaySurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            buffer: vec![TRANSPARENT; width * height],
            width,
            height,
        }
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.buffer
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        (x < self.width && y < self.height).then(|| self.buffer[y * self.width + x])
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.buffer.clear();
        self.buffer.resize(width * height, TRANSPARENT);
    }

    pub fn clear(&mut self) {
        self.buffer.fill(TRANSPARENT);
    }

    pub fn is_clear(&self) -> bool {
        self.buffer.iter().all(|&p| p == TRANSPARENT)
    }

    /// Draws a bone in surface coordinates. The segment is clipped to the
    /// surface first, so any input is safe, including non-finite values.
    pub fn draw_segment(&mut self, a: (f32, f32), b: (f32, f32), color: u32) {
        let Some(((x0, y0), (x1, y1))) = clip_segment(a, b, self.width as f32, self.height as f32) else {
            return;
        };
        self.draw_line(x0 as i32, y0 as i32, x1 as i32, y1 as i32, color);
    }

    /// Draws a joint in surface coordinates; centres too far off-surface to
    /// touch a pixel are skipped.
    pub fn draw_joint(&mut self, (x, y): (f32, f32), radius: i32, color: u32) {
        let r = radius as f32;
        let on_surface = x.is_finite()
            && y.is_finite()
            && x >= -r
            && y >= -r
            && x <= self.width as f32 + r
            && y <= self.height as f32 + r;
        if on_surface {
            self.draw_circle(x as i32, y as i32, radius, color);
        }
    }

    /// Bresenham line
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            self.set_pixel(x, y, color);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Filled circle
    fn draw_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u32) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.buffer[y as usize * self.width + x as usize] = OPAQUE | color;
        }
    }
}

/// Liang-Barsky clip of `a`-`b` to the pixel rectangle of a `width` x `height`
/// surface. `None` when the segment misses it or an endpoint is not finite.
fn clip_segment(a: (f32, f32), b: (f32, f32), width: f32, height: f32) -> Option<((f32, f32), (f32, f32))> {
    if ![a.0, a.1, b.0, b.1].iter().all(|v| v.is_finite()) || width < 1.0 || height < 1.0 {
        return None;
    }
    // f64 keeps the intersection exact enough for far-away endpoints
    let (ax, ay) = (a.0 as f64, a.1 as f64);
    let (dx, dy) = (b.0 as f64 - ax, b.1 as f64 - ay);
    let (x_max, y_max) = (width as f64 - 1.0, height as f64 - 1.0);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [(-dx, ax), (dx, x_max - ax), (-dy, ay), (dy, y_max - ay)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let t = q / p;
            if p < 0.0 {
                t0 = t0.max(t);
            } else {
                t1 = t1.min(t);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    let point = |t: f64| {
        (
            (ax + t * dx).clamp(0.0, x_max) as f32,
            (ay + t * dy).clamp(0.0, y_max) as f32,
        )
    };
    Some((point(t0), point(t1)))
}

/// Draws the latest skeleton over a letterboxed video.
///
/// Keeps the most recent landmarks and intrinsic size so that a surface
/// resize can redraw without waiting for the next feedback.
pub struct OverlayRenderer {
    surface: OverlaySurface,
    threshold: f32,
    landmarks: Vec<Landmark>,
    intrinsic: (u32, u32),
    scene: OverlayScene,
}

impl OverlayRenderer {
    pub fn new(width: usize, height: usize, threshold: f32) -> Self {
        Self {
            surface: OverlaySurface::new(width, height),
            threshold,
            landmarks: Vec::new(),
            intrinsic: (0, 0),
            scene: OverlayScene::default(),
        }
    }

    pub fn surface(&self) -> &OverlaySurface {
        &self.surface
    }

    pub fn scene(&self) -> &OverlayScene {
        &self.scene
    }

    /// Current fit of the video inside the surface, if there is geometry.
    pub fn fit(&self) -> Option<LetterboxFit> {
        let (w, h) = self.surface.size();
        LetterboxFit::contain(self.intrinsic, (w as u32, h as u32))
    }

    /// New landmark set from the service.
    pub fn render(&mut self, landmarks: &[Landmark], intrinsic: (u32, u32)) {
        self.landmarks.clear();
        self.landmarks.extend_from_slice(landmarks);
        self.intrinsic = intrinsic;
        self.redraw();
    }

    /// Display surface changed size; re-fit the last landmarks.
    pub fn resize(&mut self, width: usize, height: usize) {
        if self.surface.size() != (width, height) {
            self.surface.resize(width, height);
        }
        self.redraw();
    }

    /// Video geometry changed (source switch); re-fit the last landmarks.
    pub fn set_intrinsic(&mut self, intrinsic: (u32, u32)) {
        if self.intrinsic != intrinsic {
            self.intrinsic = intrinsic;
            self.redraw();
        }
    }

    /// Drops the skeleton, e.g. when the source is torn down.
    pub fn clear(&mut self) {
        self.landmarks.clear();
        self.redraw();
    }

    fn redraw(&mut self) {
        self.surface.clear();
        self.scene = match self.fit() {
            Some(fit) if !self.landmarks.is_empty() => plan_scene(&self.landmarks, &fit, self.threshold),
            _ => OverlayScene::default(),
        };

        for &(a, b) in &self.scene.bones {
            self.surface.draw_segment(a, b, BONE_COLOR);
        }
        for &joint in &self.scene.joints {
            self.surface.draw_joint(joint, JOINT_RADIUS, JOINT_COLOR);
        }
    }
}
