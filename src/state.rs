//! Shared control state crossing the process boundary.
//!
//! An external configuration/API layer holds a clone of [`SharedState`] and
//! pokes flags; the render loop drains them once per tick. The published
//! frame mirrors the last fully composed back buffer and is readable at any
//! time for previews, whether or not a device transfer happened.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{Orientation, RefreshMode};
use crate::led::LedCommand;

#[derive(Debug, Default)]
struct Inner {
    force_redraw: bool,
    requested_screen: Option<usize>,
    paused: bool,
    orientation: Option<Orientation>,
    refresh_mode: Option<RefreshMode>,
    led: Option<LedCommand>,
    timing: Option<(u64, u64, u64)>,
    frame_width: u16,
    frame_height: u16,
    frame: Vec<u16>,
}

/// Edge-triggered signals drained by the render loop each tick.
#[derive(Debug, Default)]
pub struct Signals {
    pub force_redraw: bool,
    pub requested_screen: Option<usize>,
    pub orientation: Option<Orientation>,
    pub refresh_mode: Option<RefreshMode>,
    pub led: Option<LedCommand>,
    /// `(poll_ms, refresh_ms, heartbeat_ms)`, zero fields keep current
    /// values.
    pub timing: Option<(u64, u64, u64)>,
}

#[derive(Clone)]
pub struct SharedState(Arc<Mutex<Inner>>);

impl SharedState {
    pub fn new(width: u16, height: u16) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            frame_width: width,
            frame_height: height,
            frame: vec![0; width as usize * height as usize],
            ..Inner::default()
        })))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn force_redraw(&self) {
        self.lock().force_redraw = true;
    }

    pub fn request_screen(&self, index: usize) {
        self.lock().requested_screen = Some(index);
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        self.lock().orientation = Some(orientation);
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        self.lock().refresh_mode = Some(mode);
    }

    pub fn set_led(&self, command: LedCommand) {
        self.lock().led = Some(command);
    }

    pub fn set_timing(&self, poll_ms: u64, refresh_ms: u64, heartbeat_ms: u64) {
        self.lock().timing = Some((poll_ms, refresh_ms, heartbeat_ms));
    }

    /// Pause is level-triggered and read separately from the edge signals.
    pub fn paused(&self) -> bool {
        self.lock().paused
    }

    /// Latest composed frame as `(width, height, RGB565 samples)`.
    pub fn frame(&self) -> (u16, u16, Vec<u16>) {
        let inner = self.lock();
        (inner.frame_width, inner.frame_height, inner.frame.clone())
    }

    pub(crate) fn take_signals(&self) -> Signals {
        let mut inner = self.lock();
        Signals {
            force_redraw: std::mem::take(&mut inner.force_redraw),
            requested_screen: inner.requested_screen.take(),
            orientation: inner.orientation.take(),
            refresh_mode: inner.refresh_mode.take(),
            led: inner.led.take(),
            timing: inner.timing.take(),
        }
    }

    pub(crate) fn publish_frame(&self, width: u16, height: u16, data: &[u16]) {
        let mut inner = self.lock();
        inner.frame_width = width;
        inner.frame_height = height;
        if inner.frame.len() == data.len() {
            inner.frame.copy_from_slice(data);
        } else {
            inner.frame = data.to_vec();
        }
    }
}
