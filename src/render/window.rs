use anyhow::Result;
use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

use crate::render::letterbox::LetterboxFit;
use crate::render::overlay::OverlaySurface;
use crate::render::skeleton::OPAQUE;

const BACKGROUND: u32 = 0x000000;

/// Resizable minifb window: letterboxed video with the skeleton overlay on top.
pub struct OverlayWindow {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl OverlayWindow {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let mut window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: true,
                ..WindowOptions::default()
            },
        )?;
        // 0 disables minifb's own limiter; the event loop's refresh tick paces updates
        window.set_target_fps(0);

        Ok(Self {
            window,
            buffer: vec![BACKGROUND; width * height],
            width,
            height,
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    pub fn is_key_pressed(&self, key: Key) -> bool {
        self.window.is_key_pressed(key, KeyRepeat::No)
    }

    /// Rendered size of the display surface (changes when the user resizes).
    pub fn surface_size(&self) -> (usize, usize) {
        self.window.get_size()
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    /// Composes one frame and pushes it to the window.
    pub fn present(&mut self, frame: Option<&RgbImage>, overlay: &OverlaySurface) -> Result<()> {
        let (w, h) = self.surface_size();
        if (w, h) != (self.width, self.height) {
            self.width = w;
            self.height = h;
            self.buffer.resize(w * h, BACKGROUND);
        }
        self.buffer.fill(BACKGROUND);

        if let Some(frame) = frame {
            self.draw_frame(frame);
        }
        self.blend_overlay(overlay);

        self.window.update_with_buffer(&self.buffer, self.width, self.height)?;
        Ok(())
    }

    /// Nearest-neighbour scale of the frame into its contain-fit rectangle.
    fn draw_frame(&mut self, frame: &RgbImage) {
        let (fw, fh) = frame.dimensions();
        let Some(fit) = LetterboxFit::contain((fw, fh), (self.width as u32, self.height as u32)) else {
            return;
        };

        let x_start = fit.x_offset.max(0.0) as usize;
        let y_start = fit.y_offset.max(0.0) as usize;
        let x_end = ((fit.x_offset + fit.render_width) as usize).min(self.width);
        let y_end = ((fit.y_offset + fit.render_height) as usize).min(self.height);

        for y in y_start..y_end {
            let sy = (((y - y_start) as f32 / fit.render_height) * fh as f32) as u32;
            let sy = sy.min(fh - 1);
            for x in x_start..x_end {
                let sx = (((x - x_start) as f32 / fit.render_width) * fw as f32) as u32;
                let pixel = frame.get_pixel(sx.min(fw - 1), sy);
                let [r, g, b] = pixel.0;
                self.buffer[y * self.width + x] = ((r as u32) << 16) | ((g as u32) << 8) | b as u32;
            }
        }
    }

    fn blend_overlay(&mut self, overlay: &OverlaySurface) {
        let (ow, oh) = overlay.size();
        let pixels = overlay.pixels();
        for y in 0..oh.min(self.height) {
            for x in 0..ow.min(self.width) {
                let p = pixels[y * ow + x];
                if p & OPAQUE == OPAQUE {
                    self.buffer[y * self.width + x] = p & 0x00FF_FFFF;
                }
            }
        }
    }
}
