//! paneld drives a small USB-HID status display (320x170 RGB565) and an
//! optional serial LED strip controller, rendering live sensor data into
//! rotating screens.
//!
//! Three execution contexts, connected by channels only:
//! - the render loop ([`render::RenderEngine`]) composes frames and computes
//!   dirty regions on the main thread;
//! - the panel worker ([`worker`]) owns the HID handle and paces transfers;
//! - the LED worker ([`led`]) owns the serial port and applies strip themes.

pub mod config;
pub mod led;
pub mod panel;
pub mod render;
pub mod rotation;
pub mod sensors;
pub mod state;
pub mod surface;
pub mod widgets;
pub mod worker;
