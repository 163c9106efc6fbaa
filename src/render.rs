//! Render engine: composes the active screen once per poll interval and
//! feeds the panel worker.
//!
//! Per tick: drain completion notices, fold in external signals, advance the
//! rotation state machine, sample sensors bound to inactive screens (so
//! time-series data never gaps), compose the active screen into the back
//! surface, then hand transfers to the worker — a full redraw when the theme
//! demands one or a redraw is pending, dirty-region updates otherwise. The
//! composed frame is mirrored into the shared preview buffer every tick,
//! device or no device.
//!
//! Only one redraw/update transfer is in flight at a time. While the gate is
//! closed nothing new is sent and no dirty regions accumulate; the worker's
//! completion notice re-opens it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use embedded_graphics::pixelcolor::{Rgb565, Rgb888};
use embedded_graphics::prelude::*;
use image::imageops::FilterType;
use log::{debug, info, warn};

use crate::config::{Config, Orientation, RefreshMode, Theme};
use crate::led::LedCommand;
use crate::rotation::Rotation;
use crate::sensors::SensorRegistry;
use crate::state::SharedState;
use crate::surface::{Canvas, Rect, Surface, MAX_UPDATE_AREA};
use crate::widgets::{parse_color, WidgetRegistry, WidgetState};
use crate::worker::{JobDone, PanelJob};

enum WallpaperCache {
    Unloaded,
    Failed,
    Loaded(Vec<u16>),
}

pub struct RenderEngine {
    config: Config,
    theme: Theme,
    surfaces: [Surface; 2],
    active_surface: usize,
    rotation: Rotation,
    sensors: SensorRegistry,
    widgets: WidgetRegistry,
    widget_state: HashMap<u32, WidgetState>,
    changes: Vec<Rect>,
    in_flight: bool,
    redraw_pending: bool,
    device_portrait: Option<bool>,
    wallpaper: WallpaperCache,
    jobs: Sender<PanelJob>,
    done: Receiver<JobDone>,
    led: Sender<LedCommand>,
    shared: SharedState,
}

impl RenderEngine {
    pub fn new(
        config: Config,
        theme: Theme,
        jobs: Sender<PanelJob>,
        done: Receiver<JobDone>,
        led: Sender<LedCommand>,
        shared: SharedState,
    ) -> Self {
        let width = config.canvas.width;
        let height = config.canvas.height;
        Self {
            surfaces: [Surface::new(width, height), Surface::new(width, height)],
            active_surface: 0,
            rotation: Rotation::new(),
            sensors: SensorRegistry::with_defaults(),
            widgets: WidgetRegistry::with_defaults(),
            widget_state: HashMap::new(),
            changes: Vec::new(),
            in_flight: false,
            // the first composed frame always goes out whole
            redraw_pending: true,
            device_portrait: None,
            wallpaper: WallpaperCache::Unloaded,
            config,
            theme,
            jobs,
            done,
            led,
            shared,
        }
    }

    pub fn run(mut self) -> Result<()> {
        info!(
            "render loop: {}x{} canvas, {} screens, {:?} refresh",
            self.config.canvas.width,
            self.config.canvas.height,
            self.theme.screens.len(),
            self.theme.refresh
        );
        // sync the panel clock right away and put the strip into its
        // configured state
        let _ = self.jobs.send(PanelJob::Heartbeat);
        let _ = self.led.send(self.config.led.resolve());

        loop {
            let started = Instant::now();
            self.drain_completions();
            self.apply_signals();
            self.tick();
            let poll = Duration::from_millis(self.config.poll_ms.max(10));
            if let Some(rest) = poll.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    fn drain_completions(&mut self) {
        loop {
            match self.done.try_recv() {
                Ok(JobDone::Redraw) => {
                    self.in_flight = false;
                    self.redraw_pending = false;
                }
                Ok(JobDone::Update) => self.in_flight = false,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply_signals(&mut self) {
        let signals = self.shared.take_signals();
        if signals.force_redraw {
            self.redraw_pending = true;
        }
        if let Some(index) = signals.requested_screen {
            self.rotation.request(index);
        }
        self.rotation.set_paused(self.shared.paused());
        if let Some(orientation) = signals.orientation {
            self.theme.orientation = orientation;
        }
        if let Some(mode) = signals.refresh_mode {
            self.theme.refresh = mode;
        }
        if let Some(command) = signals.led {
            let _ = self.led.send(command);
        }
        if let Some((poll_ms, refresh_ms, heartbeat_ms)) = signals.timing {
            if poll_ms > 0 {
                self.config.poll_ms = poll_ms;
            }
            if refresh_ms > 0 {
                self.config.refresh_ms = refresh_ms;
            }
            if heartbeat_ms > 0 {
                self.config.heartbeat_ms = heartbeat_ms;
            }
            let _ = self.jobs.send(PanelJob::Config {
                poll_ms,
                refresh_ms,
                heartbeat_ms,
            });
        }
    }

    fn tick(&mut self) {
        // stale device orientation: push only the config command and defer
        // composition to the next tick
        let portrait = self.theme.orientation == Orientation::Portrait;
        if self.device_portrait != Some(portrait) {
            self.device_portrait = Some(portrait);
            self.changes.clear();
            self.redraw_pending = true;
            let _ = self.jobs.send(PanelJob::Orientation { portrait });
            return;
        }

        if self.theme.screens.is_empty() {
            // nothing configured; keep the preview honest
            let surface = &mut self.surfaces[self.active_surface];
            surface.fill(Rgb565::BLACK);
            self.publish();
            return;
        }

        let index = self.rotation.index().min(self.theme.screens.len() - 1);
        let duration = self.theme.screens[index].duration_ms;
        if self
            .rotation
            .tick(self.theme.screens.len(), duration, Instant::now())
        {
            let screen = &self.theme.screens[self.rotation.index()];
            info!("screen {}: {}", screen.id, screen.name);
            if screen.wallpaper.is_some() {
                self.wallpaper = WallpaperCache::Unloaded;
            }
            if let Some(led) = &screen.led {
                let _ = self.led.send(led.resolve());
            }
            self.redraw_pending = true;
        }

        self.poll_inactive_sensors();
        self.compose();
        self.transfer();
    }

    /// Samples sensor bindings on every screen that is not showing, so a
    /// series that only appears on screen 2 keeps collecting points while
    /// screen 1 has the panel.
    fn poll_inactive_sensors(&mut self) {
        let active = self.rotation.index();
        for (index, screen) in self.theme.screens.iter().enumerate() {
            if index == active {
                continue;
            }
            for widget in &screen.widgets {
                if let Some(sensor) = widget.sensor.as_deref() {
                    self.sensors.sample(sensor, widget.refresh_ms, "");
                }
            }
        }
    }

    fn compose(&mut self) {
        let portrait = self.theme.orientation == Orientation::Portrait;
        let Self {
            config,
            theme,
            surfaces,
            active_surface,
            rotation,
            sensors,
            widgets,
            widget_state,
            changes,
            in_flight,
            wallpaper,
            ..
        } = self;
        let screen = &theme.screens[rotation.index().min(theme.screens.len() - 1)];
        let surface = &mut surfaces[*active_surface];

        surface.fill(parse_color(&screen.background, Rgb565::BLACK));
        if let Some(path) = &screen.wallpaper {
            if let Some(pixels) =
                wallpaper_pixels(wallpaper, path, surface.width(), surface.height())
            {
                surface.blit(pixels);
            }
        }

        let (max_width, max_height) = if portrait {
            (config.canvas.height, config.canvas.width)
        } else {
            (config.canvas.width, config.canvas.height)
        };

        let mut canvas = Canvas::new(surface, portrait);
        for widget_config in &screen.widgets {
            let sample = widget_config.sensor.as_deref().and_then(|name| {
                sensors.sample(name, widget_config.refresh_ms, &widget_config.format)
            });
            let (value, min, max) = match sample {
                Some(sample) => (sample.value, sample.min, sample.max),
                // missing sensor: fall back to the static value, draw blank
                // rather than fail the tick
                None => (widget_config.value.clone(), 0.0, 0.0),
            };

            let Some(renderer) = widgets.get(&widget_config.name) else {
                debug!(
                    "widget {}: no renderer named {:?}",
                    widget_config.id, widget_config.name
                );
                continue;
            };
            let state = widget_state.entry(widget_config.id).or_default();
            let changed = renderer.draw(&mut canvas, &value, min, max, widget_config, state);

            if changed && !*in_flight {
                let clamped = widget_config.rect.clamped(max_width, max_height);
                changes.extend(clamped.tiled(MAX_UPDATE_AREA));
            }
        }
    }

    fn transfer(&mut self) {
        if self.in_flight {
            // previous transfer still on the wire; the completion notice
            // re-opens the gate
            self.publish();
            return;
        }

        let mut sent = false;
        if self.theme.refresh == RefreshMode::Redraw || self.redraw_pending {
            // a full redraw supersedes any queued partial updates
            self.changes.clear();
            let pixels = self.surfaces[self.active_surface].data().to_vec();
            if self.jobs.send(PanelJob::Redraw { pixels }).is_ok() {
                sent = true;
            }
        } else if !self.changes.is_empty() {
            let portrait = self.device_portrait == Some(true);
            let height = self.config.canvas.height;
            let surface = &self.surfaces[self.active_surface];
            for rect in self.changes.drain(..) {
                let device_rect = if portrait {
                    rect.to_portrait(height)
                } else {
                    rect
                };
                if device_rect.is_empty() {
                    continue;
                }
                let pixels = surface.extract(&device_rect);
                if self
                    .jobs
                    .send(PanelJob::Update {
                        rect: device_rect,
                        pixels,
                    })
                    .is_ok()
                {
                    sent = true;
                }
            }
        }

        if sent {
            self.in_flight = true;
        }
        self.publish();
        if sent {
            // flip the back buffers only when something actually went out
            self.active_surface ^= 1;
        }
    }

    fn publish(&self) {
        let surface = &self.surfaces[self.active_surface];
        self.shared
            .publish_frame(surface.width(), surface.height(), surface.data());
    }
}

fn wallpaper_pixels<'a>(
    cache: &'a mut WallpaperCache,
    path: &Path,
    width: u16,
    height: u16,
) -> Option<&'a Vec<u16>> {
    if matches!(cache, WallpaperCache::Unloaded) {
        match load_wallpaper(path, width, height) {
            Ok(pixels) => *cache = WallpaperCache::Loaded(pixels),
            Err(err) => {
                warn!("wallpaper {}: {err:#}", path.display());
                *cache = WallpaperCache::Failed;
            }
        }
    }
    match cache {
        WallpaperCache::Loaded(pixels) => Some(pixels),
        _ => None,
    }
}

fn load_wallpaper(path: &Path, width: u16, height: u16) -> Result<Vec<u16>> {
    let img = image::open(path).with_context(|| format!("loading {}", path.display()))?;
    let img = img.resize_exact(width as u32, height as u32, FilterType::Lanczos3);
    let rgb = img.to_rgb8();
    Ok(rgb
        .pixels()
        .map(|px| Rgb565::from(Rgb888::new(px[0], px[1], px[2])).into_storage())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Rect;
    use std::sync::mpsc::{self, Sender};

    fn theme_json(orientation: &str, refresh: &str) -> Theme {
        let json = format!(
            r#"{{
                "orientation": "{orientation}",
                "refresh": "{refresh}",
                "screens": [
                    {{ "id": 1, "duration_ms": 0, "widgets": [
                        {{ "id": 1, "name": "text", "value": "hello",
                           "rect": {{ "x": 10, "y": 5, "width": 20, "height": 8 }} }}
                    ] }}
                ]
            }}"#
        );
        let mut theme: Theme = serde_json::from_str(&json).unwrap();
        theme.normalize();
        theme
    }

    struct Harness {
        engine: RenderEngine,
        jobs: mpsc::Receiver<PanelJob>,
        done: Sender<JobDone>,
        #[allow(dead_code)]
        leds: mpsc::Receiver<LedCommand>,
    }

    fn harness(theme: Theme) -> Harness {
        let config: Config = serde_json::from_str("{}").unwrap();
        let (job_tx, job_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let (led_tx, led_rx) = mpsc::channel();
        let shared = SharedState::new(config.canvas.width, config.canvas.height);
        Harness {
            engine: RenderEngine::new(config, theme, job_tx, done_rx, led_tx, shared),
            jobs: job_rx,
            done: done_tx,
            leds: led_rx,
        }
    }

    fn drain(jobs: &mpsc::Receiver<PanelJob>) -> Vec<PanelJob> {
        let mut out = Vec::new();
        while let Ok(job) = jobs.try_recv() {
            out.push(job);
        }
        out
    }

    #[test]
    fn test_first_tick_pushes_orientation_only() {
        let mut h = harness(theme_json("landscape", "update"));
        h.engine.tick();

        let jobs = drain(&h.jobs);
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0], PanelJob::Orientation { portrait: false }));
        // composition was deferred, nothing else went out
    }

    #[test]
    fn test_redraw_supersedes_pending_updates() {
        let mut h = harness(theme_json("landscape", "update"));
        h.engine.device_portrait = Some(false);
        h.engine.changes.push(Rect::new(0, 0, 10, 10));
        h.engine.redraw_pending = true;

        h.engine.tick();

        let jobs = drain(&h.jobs);
        let redraws = jobs
            .iter()
            .filter(|job| matches!(job, PanelJob::Redraw { .. }))
            .count();
        let updates = jobs
            .iter()
            .filter(|job| matches!(job, PanelJob::Update { .. }))
            .count();
        assert_eq!(redraws, 1);
        assert_eq!(updates, 0);
        assert!(h.engine.changes.is_empty());
        assert!(h.engine.in_flight);
    }

    #[test]
    fn test_dirty_widget_becomes_update_job() {
        let mut h = harness(theme_json("landscape", "update"));
        h.engine.device_portrait = Some(false);
        h.engine.redraw_pending = false;

        h.engine.tick();

        let jobs = drain(&h.jobs);
        assert_eq!(jobs.len(), 1);
        match &jobs[0] {
            PanelJob::Update { rect, pixels } => {
                assert_eq!(*rect, Rect::new(10, 5, 20, 8));
                assert_eq!(pixels.len(), 160);
            }
            _ => panic!("expected an update job"),
        }
    }

    #[test]
    fn test_portrait_updates_are_translated_to_device_space() {
        let mut h = harness(theme_json("portrait", "update"));
        h.engine.device_portrait = Some(true);
        h.engine.redraw_pending = false;

        h.engine.tick();

        let jobs = drain(&h.jobs);
        assert_eq!(jobs.len(), 1);
        match &jobs[0] {
            PanelJob::Update { rect, .. } => {
                assert_eq!(*rect, Rect::new(5, 140, 8, 20));
            }
            _ => panic!("expected an update job"),
        }
    }

    #[test]
    fn test_in_flight_gate_blocks_and_completion_reopens() {
        let mut h = harness(theme_json("landscape", "update"));
        h.engine.device_portrait = Some(false);
        h.engine.redraw_pending = false;

        h.engine.tick();
        assert_eq!(drain(&h.jobs).len(), 1);
        assert!(h.engine.in_flight);

        // widget value is static now, but even a forced redraw must wait
        h.engine.redraw_pending = true;
        h.engine.tick();
        assert!(drain(&h.jobs).is_empty());

        h.done.send(JobDone::Update).unwrap();
        h.engine.drain_completions();
        assert!(!h.engine.in_flight);

        h.engine.tick();
        let jobs = drain(&h.jobs);
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0], PanelJob::Redraw { .. }));
    }

    #[test]
    fn test_redraw_mode_streams_every_tick() {
        let mut h = harness(theme_json("landscape", "redraw"));
        h.engine.device_portrait = Some(false);
        h.engine.redraw_pending = false;

        h.engine.tick();
        let jobs = drain(&h.jobs);
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0], PanelJob::Redraw { .. }));

        h.done.send(JobDone::Redraw).unwrap();
        h.engine.drain_completions();
        h.engine.tick();
        assert!(matches!(drain(&h.jobs)[0], PanelJob::Redraw { .. }));
    }

    #[test]
    fn test_preview_is_published_without_device() {
        let mut h = harness(theme_json("landscape", "update"));
        h.engine.device_portrait = Some(false);
        let shared = h.engine.shared.clone();

        h.engine.tick();
        let (width, height, frame) = shared.frame();
        assert_eq!((width, height), (320, 170));
        assert!(frame.iter().any(|&sample| sample != 0));
    }

    #[test]
    fn test_force_redraw_signal_is_applied() {
        let mut h = harness(theme_json("landscape", "update"));
        h.engine.device_portrait = Some(false);
        h.engine.redraw_pending = false;
        let shared = h.engine.shared.clone();

        shared.force_redraw();
        h.engine.apply_signals();
        h.engine.tick();

        let jobs = drain(&h.jobs);
        assert!(matches!(jobs[0], PanelJob::Redraw { .. }));
    }

    #[test]
    fn test_empty_theme_still_publishes() {
        let mut theme = theme_json("landscape", "update");
        theme.screens.clear();
        let mut h = harness(theme);
        h.engine.device_portrait = Some(false);

        h.engine.tick();
        assert!(drain(&h.jobs).is_empty());
        let (_, _, frame) = h.engine.shared.frame();
        assert!(frame.iter().all(|&sample| sample == 0));
    }
}
