//! LED strip controller: 5-byte serial frames and the worker thread that
//! owns the port.
//!
//! The controller is a slow peripheral behind a USB-serial bridge. Frames
//! are written one byte at a time with a fixed delay; pushing bytes faster
//! makes it drop whole frames. LED failures are logged and swallowed — the
//! strip must never stall panel rendering.

use std::io::Write;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serialport::SerialPort;

pub const FRAME_SIZE: usize = 5;

const SIGNATURE: u8 = 0xFA;
const BAUD_RATE: u32 = 115_200;
const BYTE_DELAY: Duration = Duration::from_millis(5);

const MIN_LEVEL: u8 = 0x01;
const MAX_LEVEL: u8 = 0x05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedTheme {
    Rainbow,
    Breathing,
    Color,
    Off,
    Auto,
}

impl LedTheme {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Rainbow),
            0x02 => Some(Self::Breathing),
            0x03 => Some(Self::Color),
            0x04 => Some(Self::Off),
            0x05 => Some(Self::Auto),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Rainbow => 0x01,
            Self::Breathing => 0x02,
            Self::Color => 0x03,
            Self::Off => 0x04,
            Self::Auto => 0x05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedCommand {
    pub theme: LedTheme,
    /// 1..=5, 5 strongest.
    pub intensity: u8,
    /// 1..=5, 5 fastest.
    pub speed: u8,
}

/// User-facing levels run 1..=5 with 5 the strongest; the controller wants
/// them inverted, 1 strongest.
fn fix_value(value: u8) -> u8 {
    (6i16 - value as i16).clamp(MIN_LEVEL as i16, MAX_LEVEL as i16) as u8
}

// Wrapping u8 sum over the first four bytes; the controller expects the
// truncated value.
fn checksum(frame: &[u8]) -> u8 {
    frame[..4].iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

pub fn encode(command: &LedCommand) -> [u8; FRAME_SIZE] {
    // off frames carry raw max levels, not inverted ones
    let (intensity, speed) = match command.theme {
        LedTheme::Off => (MAX_LEVEL, MAX_LEVEL),
        _ => (fix_value(command.intensity), fix_value(command.speed)),
    };
    let mut frame = [SIGNATURE, command.theme.code(), intensity, speed, 0];
    frame[4] = checksum(&frame);
    frame
}

/// Spawns the LED worker. It owns the serial port exclusively, reacting only
/// to inbound commands, and exits when the command channel closes.
pub fn spawn(device: String, commands: Receiver<LedCommand>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!("led worker: started");
        let mut port: Option<Box<dyn SerialPort>> = None;
        while let Ok(command) = commands.recv() {
            apply(&mut port, &device, &command);
        }
        info!("led worker: stopping");
    })
}

fn apply(cache: &mut Option<Box<dyn SerialPort>>, device: &str, command: &LedCommand) {
    let frame = encode(command);

    // the cached handle is reused across commands; a failed write drops it
    // so the next command reopens the port
    if cache.is_none() {
        match serialport::new(device, BAUD_RATE)
            .timeout(Duration::from_secs(1))
            .open()
        {
            Ok(opened) => *cache = Some(opened),
            Err(err) => {
                warn!("led worker: opening {device}: {err}");
                return;
            }
        }
    }
    let Some(port) = cache.as_mut() else {
        return;
    };

    let mut failed = false;
    for byte in frame {
        if let Err(err) = port.write_all(&[byte]) {
            warn!("led worker: write to {device} failed: {err}");
            failed = true;
            break;
        }
        thread::sleep(BYTE_DELAY);
    }
    if failed {
        *cache = None;
    } else {
        debug!("led worker: applied {command:?}");
    }
}
