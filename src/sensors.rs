//! Sensor samplers feeding widget values.
//!
//! Samplers are registered statically by name at startup; widget configs
//! reference them through the `sensor` field. Every sampler rate-limits
//! itself so a binding polled each tick re-reads the underlying source at
//! most once per its configured rate. Read failures degrade to zero values
//! rather than failing the render tick.

use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};

use chrono::format::{Item, StrftimeItems};
use chrono::Local;

#[derive(Debug, Clone)]
pub struct Sample {
    pub value: String,
    pub min: f64,
    pub max: f64,
}

pub trait Sensor: Send {
    fn name(&self) -> &'static str;
    /// Samples at most once per `rate_ms`; in between the cached reading is
    /// re-formatted and returned.
    fn sample(&mut self, rate_ms: u64, format: &str) -> Sample;
}

/// Tracks when the underlying source was last read.
#[derive(Debug, Default)]
struct RateGate {
    last: Option<Instant>,
}

impl RateGate {
    fn due(&mut self, rate_ms: u64) -> bool {
        if let Some(at) = self.last {
            if rate_ms > 0 && at.elapsed() < Duration::from_millis(rate_ms) {
                return false;
            }
        }
        self.last = Some(Instant::now());
        true
    }
}

/// Applies the widget's format hint to a numeric reading. An empty hint
/// renders the bare number.
fn format_value(value: f64, format: &str) -> String {
    let text = if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    };
    if format.is_empty() {
        text
    } else {
        format.replace("{value}", &text)
    }
}

pub struct SensorRegistry {
    sensors: HashMap<&'static str, Box<dyn Sensor>>,
}

impl SensorRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            sensors: HashMap::new(),
        };
        registry.register(Box::new(CpuSensor::default()));
        registry.register(Box::new(MemorySensor::default()));
        registry.register(Box::new(ClockSensor::default()));
        registry.register(Box::new(UptimeSensor::default()));
        registry
    }

    pub fn register(&mut self, sensor: Box<dyn Sensor>) {
        self.sensors.insert(sensor.name(), sensor);
    }

    /// Returns `None` for unknown sensor names; the widget then falls back
    /// to its static value.
    pub fn sample(&mut self, name: &str, rate_ms: u64, format: &str) -> Option<Sample> {
        self.sensors
            .get_mut(name)
            .map(|sensor| sensor.sample(rate_ms, format))
    }
}

/// CPU utilization approximated from the 1-minute load average, like the
/// panel has always shown it.
#[derive(Default)]
struct CpuSensor {
    gate: RateGate,
    percent: f64,
}

impl Sensor for CpuSensor {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn sample(&mut self, rate_ms: u64, format: &str) -> Sample {
        if self.gate.due(rate_ms) {
            self.percent = read_cpu_percent().unwrap_or(0.0);
        }
        Sample {
            value: format_value(self.percent, format),
            min: 0.0,
            max: 100.0,
        }
    }
}

fn read_cpu_percent() -> Option<f64> {
    let loadavg = fs::read_to_string("/proc/loadavg").ok()?;
    let load1min: f64 = loadavg.split_whitespace().next()?.parse().ok()?;
    let cpu_count = num_cpus::get() as f64;
    Some((load1min / cpu_count * 100.0).min(100.0))
}

/// Memory pressure from /proc/meminfo as used percent.
#[derive(Default)]
struct MemorySensor {
    gate: RateGate,
    percent: f64,
}

impl Sensor for MemorySensor {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn sample(&mut self, rate_ms: u64, format: &str) -> Sample {
        if self.gate.due(rate_ms) {
            self.percent = read_memory_percent().unwrap_or(0.0);
        }
        Sample {
            value: format_value(self.percent, format),
            min: 0.0,
            max: 100.0,
        }
    }
}

fn read_memory_percent() -> Option<f64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = 0u64;
    let mut available = 0u64;
    for line in meminfo.lines() {
        if line.starts_with("MemTotal:") {
            total = line.split_whitespace().nth(1)?.parse().ok()?;
        } else if line.starts_with("MemAvailable:") {
            available = line.split_whitespace().nth(1)?.parse().ok()?;
        }
    }
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

/// Wall clock. The format hint is a strftime string; default is HH:MM:SS.
#[derive(Default)]
struct ClockSensor;

impl Sensor for ClockSensor {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn sample(&mut self, _rate_ms: u64, format: &str) -> Sample {
        // a bad strftime pattern would make the formatter panic; fall back
        // to the default instead
        let mut pattern = if format.is_empty() { "%H:%M:%S" } else { format };
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            pattern = "%H:%M:%S";
        }
        Sample {
            value: Local::now().format(pattern).to_string(),
            min: 0.0,
            max: 0.0,
        }
    }
}

#[derive(Default)]
struct UptimeSensor {
    gate: RateGate,
    seconds: u64,
}

impl Sensor for UptimeSensor {
    fn name(&self) -> &'static str {
        "uptime"
    }

    fn sample(&mut self, rate_ms: u64, _format: &str) -> Sample {
        if self.gate.due(rate_ms) {
            self.seconds = read_uptime_secs().unwrap_or(0);
        }
        Sample {
            value: format_uptime(self.seconds),
            min: 0.0,
            max: 0.0,
        }
    }
}

fn read_uptime_secs() -> Option<u64> {
    let raw = fs::read_to_string("/proc/uptime").ok()?;
    let secs: f64 = raw.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3600;
    let minutes = seconds % 3600 / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
