//! Widget renderers.
//!
//! Renderers are registered statically by name; screens reference them
//! through the widget config's `name` field. Each draw reports whether its
//! output differs from the previous tick so the render engine can build
//! dirty regions. Runtime scratch state (last value, chart history) lives in
//! a side table keyed by widget id, owned by the render engine and never
//! persisted with the theme.

use std::collections::HashMap;

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10, FONT_9X15},
        MonoFont, MonoTextStyleBuilder,
    },
    pixelcolor::{Rgb565, Rgb888},
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};

use crate::config::WidgetConfig;
use crate::surface::Canvas;

pub fn parse_color(input: &str, fallback: Rgb565) -> Rgb565 {
    let hex = input.trim().trim_start_matches('#');
    if hex.len() == 6 {
        if let Ok(value) = u32::from_str_radix(hex, 16) {
            let r = ((value >> 16) & 0xFF) as u8;
            let g = ((value >> 8) & 0xFF) as u8;
            let b = (value & 0xFF) as u8;
            return Rgb565::from(Rgb888::new(r, g, b));
        }
    }
    fallback
}

fn font_for(name: &str) -> &'static MonoFont<'static> {
    match name {
        "9x15" => &FONT_9X15,
        "10x20" => &FONT_10X20,
        _ => &FONT_6X10,
    }
}

/// Per-widget runtime scratch, separate from the persisted config.
#[derive(Debug, Default)]
pub struct WidgetState {
    last_value: Option<String>,
    history: Vec<f64>,
}

impl WidgetState {
    fn take_change(&mut self, value: &str) -> bool {
        let changed = self.last_value.as_deref() != Some(value);
        if changed {
            self.last_value = Some(value.to_string());
        }
        changed
    }
}

pub trait Widget: Send {
    fn name(&self) -> &'static str;
    /// Draws into the widget's rect and reports whether the output changed
    /// since the last tick.
    fn draw(
        &self,
        canvas: &mut Canvas<'_>,
        value: &str,
        min: f64,
        max: f64,
        config: &WidgetConfig,
        state: &mut WidgetState,
    ) -> bool;
}

pub struct WidgetRegistry {
    renderers: HashMap<&'static str, Box<dyn Widget>>,
}

impl WidgetRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            renderers: HashMap::new(),
        };
        registry.register(Box::new(TextWidget));
        registry.register(Box::new(ProgressBarWidget));
        registry.register(Box::new(BarChartWidget));
        registry
    }

    pub fn register(&mut self, widget: Box<dyn Widget>) {
        self.renderers.insert(widget.name(), widget);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Widget> {
        self.renderers.get(name).map(Box::as_ref)
    }
}

fn widget_area(config: &WidgetConfig) -> Rectangle {
    Rectangle::new(
        Point::new(config.rect.x as i32, config.rect.y as i32),
        Size::new(config.rect.width as u32, config.rect.height as u32),
    )
}

/// Scales a raw value into 0..=100 using the sensor's min/max when present.
fn percentage(value: &str, min: f64, max: f64) -> f64 {
    let raw: f64 = value.trim().trim_end_matches('%').parse().unwrap_or(0.0);
    let scaled = if max > min {
        (raw - min) / (max - min) * 100.0
    } else {
        raw
    };
    scaled.clamp(0.0, 100.0)
}

pub struct TextWidget;

impl Widget for TextWidget {
    fn name(&self) -> &'static str {
        "text"
    }

    fn draw(
        &self,
        canvas: &mut Canvas<'_>,
        value: &str,
        _min: f64,
        _max: f64,
        config: &WidgetConfig,
        state: &mut WidgetState,
    ) -> bool {
        let area = widget_area(config);
        let mut clipped = canvas.clipped(&area);

        let _ = clipped.fill_solid(
            &area,
            parse_color(&config.background_color, Rgb565::BLACK),
        );
        let style = MonoTextStyleBuilder::new()
            .font(font_for(&config.font))
            .text_color(parse_color(&config.color, Rgb565::WHITE))
            .build();
        let _ = Text::with_baseline(value, area.top_left, style, Baseline::Top).draw(&mut clipped);

        state.take_change(value)
    }
}

pub struct ProgressBarWidget;

impl Widget for ProgressBarWidget {
    fn name(&self) -> &'static str {
        "progress_bar"
    }

    fn draw(
        &self,
        canvas: &mut Canvas<'_>,
        value: &str,
        min: f64,
        max: f64,
        config: &WidgetConfig,
        state: &mut WidgetState,
    ) -> bool {
        let percent = percentage(value, min, max);
        let area = widget_area(config);
        let mut clipped = canvas.clipped(&area);

        let _ = clipped.fill_solid(
            &area,
            parse_color(&config.background_color, Rgb565::BLACK),
        );
        let color = parse_color(&config.color, Rgb565::GREEN);
        let _ = area
            .into_styled(PrimitiveStyle::with_stroke(color, 1))
            .draw(&mut clipped);

        let width = area.size.width.saturating_sub(2);
        let height = area.size.height.saturating_sub(2);
        if config.vertical {
            let fill = (percent / 100.0 * height as f64) as u32;
            if fill > 0 {
                let top = area.top_left + Point::new(1, 1 + (height - fill) as i32);
                let _ = clipped.fill_solid(&Rectangle::new(top, Size::new(width, fill)), color);
            }
        } else {
            let fill = (percent / 100.0 * width as f64) as u32;
            if fill > 0 {
                let _ = clipped.fill_solid(
                    &Rectangle::new(area.top_left + Point::new(1, 1), Size::new(fill, height)),
                    color,
                );
            }
        }

        state.take_change(&format!("{percent:.1}"))
    }
}

const BAR_WIDTH: u32 = 3;
const BAR_GAP: u32 = 1;

pub struct BarChartWidget;

impl Widget for BarChartWidget {
    fn name(&self) -> &'static str {
        "bar_chart"
    }

    fn draw(
        &self,
        canvas: &mut Canvas<'_>,
        value: &str,
        min: f64,
        max: f64,
        config: &WidgetConfig,
        state: &mut WidgetState,
    ) -> bool {
        let changed = state.take_change(value);
        if changed {
            state
                .history
                .push(value.trim().trim_end_matches('%').parse().unwrap_or(0.0));
            let points = (config.rect.width as usize / (BAR_WIDTH + BAR_GAP) as usize).max(1);
            if state.history.len() > points {
                let excess = state.history.len() - points;
                state.history.drain(..excess);
            }
        }

        let area = widget_area(config);
        let mut clipped = canvas.clipped(&area);
        let _ = clipped.fill_solid(
            &area,
            parse_color(&config.background_color, Rgb565::BLACK),
        );

        let color = parse_color(&config.color, Rgb565::CYAN);
        let floor = if max > min { min } else { 0.0 };
        let ceil = if max > min {
            max
        } else {
            state.history.iter().cloned().fold(1.0, f64::max)
        };
        let range = ceil - floor;

        let height = area.size.height;
        for (i, sample) in state.history.iter().enumerate() {
            let fraction = ((sample - floor) / range).clamp(0.0, 1.0);
            let bar_height = (fraction * height as f64).round() as u32;
            if bar_height == 0 {
                continue;
            }
            let x = area.top_left.x + (i as u32 * (BAR_WIDTH + BAR_GAP)) as i32;
            let y = area.top_left.y + (height - bar_height) as i32;
            let _ = clipped.fill_solid(
                &Rectangle::new(Point::new(x, y), Size::new(BAR_WIDTH, bar_height)),
                color,
            );
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Rect, Surface};

    fn config(rect: Rect) -> WidgetConfig {
        serde_json::from_str::<WidgetConfig>(&format!(
            r#"{{ "id": 1, "name": "text", "rect": {{ "x": {}, "y": {}, "width": {}, "height": {} }} }}"#,
            rect.x, rect.y, rect.width, rect.height
        ))
        .unwrap()
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#FF0000", Rgb565::BLACK), Rgb565::RED);
        assert_eq!(parse_color("00ff00", Rgb565::BLACK), Rgb565::GREEN);
        assert_eq!(parse_color("junk", Rgb565::BLUE), Rgb565::BLUE);
    }

    #[test]
    fn test_percentage_scaling() {
        assert_eq!(percentage("50", 0.0, 100.0), 50.0);
        assert_eq!(percentage("150", 0.0, 100.0), 100.0);
        assert_eq!(percentage("2.5", 0.0, 5.0), 50.0);
        // no range: the raw value is already a percentage
        assert_eq!(percentage("30", 0.0, 0.0), 30.0);
        assert_eq!(percentage("garbage", 0.0, 100.0), 0.0);
    }

    #[test]
    fn test_text_widget_reports_changes() {
        let mut surface = Surface::new(320, 170);
        let mut canvas = Canvas::new(&mut surface, false);
        let cfg = config(Rect::new(0, 0, 60, 12));
        let mut state = WidgetState::default();

        assert!(TextWidget.draw(&mut canvas, "42%", 0.0, 100.0, &cfg, &mut state));
        assert!(!TextWidget.draw(&mut canvas, "42%", 0.0, 100.0, &cfg, &mut state));
        assert!(TextWidget.draw(&mut canvas, "43%", 0.0, 100.0, &cfg, &mut state));
    }

    #[test]
    fn test_text_widget_paints_pixels() {
        let mut surface = Surface::new(320, 170);
        {
            let mut canvas = Canvas::new(&mut surface, false);
            let cfg = config(Rect::new(0, 0, 60, 12));
            let mut state = WidgetState::default();
            TextWidget.draw(&mut canvas, "X", 0.0, 0.0, &cfg, &mut state);
        }
        let painted = surface.data().iter().any(|&sample| sample != 0);
        assert!(painted);
    }

    #[test]
    fn test_progress_bar_changes_on_percent_only() {
        let mut surface = Surface::new(320, 170);
        let mut canvas = Canvas::new(&mut surface, false);
        let cfg = config(Rect::new(10, 10, 100, 8));
        let mut state = WidgetState::default();

        assert!(ProgressBarWidget.draw(&mut canvas, "40", 0.0, 100.0, &cfg, &mut state));
        // same percentage through a different raw string: no visual change
        assert!(!ProgressBarWidget.draw(&mut canvas, "40.0", 0.0, 100.0, &cfg, &mut state));
        assert!(ProgressBarWidget.draw(&mut canvas, "41", 0.0, 100.0, &cfg, &mut state));
    }

    #[test]
    fn test_bar_chart_history_is_capped() {
        let mut surface = Surface::new(320, 170);
        let mut canvas = Canvas::new(&mut surface, false);
        let cfg = config(Rect::new(0, 0, 40, 20));
        let mut state = WidgetState::default();

        // 40px wide with 4px pitch keeps 10 points
        for i in 0..25 {
            BarChartWidget.draw(&mut canvas, &i.to_string(), 0.0, 100.0, &cfg, &mut state);
        }
        assert_eq!(state.history.len(), 10);
        assert_eq!(*state.history.last().unwrap(), 24.0);
    }
}
