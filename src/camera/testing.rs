//! Scriptable media backend for unit tests.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use image::{Rgb, RgbImage};

use super::source::{MediaBackend, MediaElement, MediaEvents, VideoSource};
use crate::error::{ClientError, ClientResult};

/// State shared by the backend and every element it opened.
#[derive(Default)]
pub(crate) struct FakeControl {
    size: Cell<(u32, u32)>,
    paused: Cell<bool>,
    denied: Cell<bool>,
    released: Cell<u32>,
    opened: RefCell<Vec<VideoSource>>,
}

impl FakeControl {
    pub(crate) fn set_size(&self, width: u32, height: u32) {
        self.size.set((width, height));
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.set(paused);
    }

    pub(crate) fn deny_camera(&self) {
        self.denied.set(true);
    }

    pub(crate) fn released(&self) -> u32 {
        self.released.get()
    }
}

#[derive(Clone)]
pub(crate) struct FakeBackend {
    pub(crate) control: Rc<FakeControl>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        let control = FakeControl::default();
        control.paused.set(true);
        Self {
            control: Rc::new(control),
        }
    }

    pub(crate) fn opened(&self) -> Vec<VideoSource> {
        self.control.opened.borrow().clone()
    }

    fn open(&self, source: VideoSource) -> Box<dyn MediaElement> {
        self.control.opened.borrow_mut().push(source);
        Box::new(FakeElement {
            control: self.control.clone(),
        })
    }
}

impl MediaBackend for FakeBackend {
    fn open_camera(&mut self, _resolution_hint: (u32, u32), _events: MediaEvents) -> ClientResult<Box<dyn MediaElement>> {
        if self.control.denied.get() {
            return Err(ClientError::CameraAccessDenied("permission dismissed".into()));
        }
        Ok(self.open(VideoSource::Camera))
    }

    fn open_file(&mut self, _path: &Path, _events: MediaEvents) -> ClientResult<Box<dyn MediaElement>> {
        Ok(self.open(VideoSource::File))
    }
}

struct FakeElement {
    control: Rc<FakeControl>,
}

impl MediaElement for FakeElement {
    fn intrinsic_size(&self) -> (u32, u32) {
        self.control.size.get()
    }

    fn is_paused(&self) -> bool {
        self.control.paused.get()
    }

    fn copy_frame_into(&self, surface: &mut RgbImage) -> ClientResult<bool> {
        for pixel in surface.pixels_mut() {
            *pixel = Rgb([128, 128, 128]);
        }
        Ok(true)
    }

    fn release(&mut self) {
        self.control.released.set(self.control.released.get() + 1);
    }
}
