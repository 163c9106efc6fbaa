//! Wire protocol for the panel display.
//!
//! Every transfer is one fixed-size HID output report: a report-id byte
//! followed by a 4104-byte body. The body starts with an 8-byte header
//! (signature, category, subcommand, then operation-specific fields); pixel
//! payloads are RGB565 samples, big-endian, row-major. A full frame does not
//! fit in one report, so redraws stream 27 chunks with start/continue/end
//! markers and a 1-based sequence byte.
//!
//! The encoders here build complete reports and push them through an
//! injected [`PanelTransport`]; transport failures are returned to the
//! caller untouched, never retried.

use thiserror::Error;

use crate::surface::Rect;

pub const BODY_SIZE: usize = 4104;
pub const HEADER_SIZE: usize = 8;
pub const DATA_SIZE: usize = 4096;
pub const REPORT_SIZE: usize = 1 + BODY_SIZE;

pub const CHUNK_COUNT: usize = 27;
const FINAL_CHUNK_SIZE: usize = 2304;

const SIGNATURE: u8 = 0x55;

const CAT_CONFIG: u8 = 0xA1;
const CAT_REFRESH: u8 = 0xA2;
const CAT_REDRAW: u8 = 0xA3;

const CFG_ORIENTATION: u8 = 0xF1;
const CFG_SET_TIME: u8 = 0xF2;

const ORIENT_LANDSCAPE: u8 = 0x01;
const ORIENT_PORTRAIT: u8 = 0x02;

const REDRAW_START: u8 = 0xF0;
const REDRAW_CONTINUE: u8 = 0xF1;
const REDRAW_END: u8 = 0xF2;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("opening panel device: {0}")]
    Open(String),
    #[error("report write failed: {0}")]
    Write(String),
}

/// Owner of the physical link to the panel. One report in, completion or
/// error out.
pub trait PanelTransport: Send {
    fn write_report(&mut self, report: &[u8]) -> Result<(), TransportError>;
}

fn new_report(category: u8) -> Vec<u8> {
    let mut report = vec![0u8; REPORT_SIZE];
    report[1] = SIGNATURE;
    report[2] = category;
    report
}

pub fn set_orientation(
    transport: &mut dyn PanelTransport,
    portrait: bool,
) -> Result<(), TransportError> {
    let mut report = new_report(CAT_CONFIG);
    let body = &mut report[1..];
    body[2] = CFG_ORIENTATION;
    body[3] = if portrait {
        ORIENT_PORTRAIT
    } else {
        ORIENT_LANDSCAPE
    };
    transport.write_report(&report)
}

/// Keepalive doubling as a clock sync; the panel shows this time while the
/// host is otherwise idle.
pub fn heartbeat(
    transport: &mut dyn PanelTransport,
    hour: u8,
    minute: u8,
    second: u8,
) -> Result<(), TransportError> {
    let mut report = new_report(CAT_CONFIG);
    let body = &mut report[1..];
    body[2] = CFG_SET_TIME;
    body[3] = hour;
    body[4] = minute;
    body[5] = second;
    transport.write_report(&report)
}

/// Partial update of one device-space rect. The rect must fit the payload
/// (area at most 2048 samples) and the u8 width/height header fields.
pub fn refresh(
    transport: &mut dyn PanelTransport,
    rect: &Rect,
    pixels: &[u16],
) -> Result<(), TransportError> {
    debug_assert_eq!(pixels.len(), rect.area() as usize);
    debug_assert!(rect.area() as usize * 2 <= DATA_SIZE);

    let mut report = new_report(CAT_REFRESH);
    let body = &mut report[1..];
    body[2..4].copy_from_slice(&rect.x.to_le_bytes());
    body[4..6].copy_from_slice(&rect.y.to_le_bytes());
    body[6] = rect.width as u8;
    body[7] = rect.height as u8;
    for (i, sample) in pixels.iter().enumerate() {
        body[HEADER_SIZE + i * 2..HEADER_SIZE + i * 2 + 2].copy_from_slice(&sample.to_be_bytes());
    }
    transport.write_report(&report)
}

/// Streams a full frame as 27 fixed-size chunks: 26 of 4096 payload bytes
/// and a final 2304-byte chunk (320x170x2 bytes total).
pub fn redraw(transport: &mut dyn PanelTransport, pixels: &[u16]) -> Result<(), TransportError> {
    for index in 0..CHUNK_COUNT {
        let marker = match index {
            0 => REDRAW_START,
            i if i == CHUNK_COUNT - 1 => REDRAW_END,
            _ => REDRAW_CONTINUE,
        };
        let byte_offset = index * DATA_SIZE;
        let length = chunk_len(index);

        let mut report = new_report(CAT_REDRAW);
        let body = &mut report[1..];
        body[2] = marker;
        body[3] = (index + 1) as u8;
        // the offset field is 16 bits wide and wraps for the tail chunks;
        // the panel sequences on body[3]
        body[5..7].copy_from_slice(&((byte_offset & 0xFFFF) as u16).to_be_bytes());
        // length in 256-byte units; the panel never reads a low byte here,
        // the first payload byte occupies that position
        body[7] = (length >> 8) as u8;

        let first_sample = byte_offset / 2;
        for i in 0..length / 2 {
            let sample = pixels.get(first_sample + i).copied().unwrap_or(0);
            body[HEADER_SIZE + i * 2..HEADER_SIZE + i * 2 + 2]
                .copy_from_slice(&sample.to_be_bytes());
        }
        transport.write_report(&report)?;
    }
    Ok(())
}

pub fn chunk_len(index: usize) -> usize {
    if index < CHUNK_COUNT - 1 {
        DATA_SIZE
    } else {
        FINAL_CHUNK_SIZE
    }
}

/// HID-backed transport. The handle is opened once and owned exclusively by
/// the panel worker thread.
pub struct HidTransport {
    device: hidapi::HidDevice,
}

impl HidTransport {
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, TransportError> {
        let api = hidapi::HidApi::new().map_err(|err| TransportError::Open(err.to_string()))?;
        let device = api
            .open(vendor_id, product_id)
            .map_err(|err| TransportError::Open(err.to_string()))?;
        Ok(Self { device })
    }
}

impl PanelTransport for HidTransport {
    fn write_report(&mut self, report: &[u8]) -> Result<(), TransportError> {
        let written = self
            .device
            .write(report)
            .map_err(|err| TransportError::Write(err.to_string()))?;
        if written < report.len() {
            return Err(TransportError::Write(format!(
                "short write: {written} of {} bytes",
                report.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub reports: Vec<Vec<u8>>,
        pub fail: bool,
    }

    impl PanelTransport for MockTransport {
        fn write_report(&mut self, report: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Write("mock failure".into()));
            }
            self.reports.push(report.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_orientation_report() {
        let mut mock = MockTransport::default();
        set_orientation(&mut mock, true).unwrap();
        set_orientation(&mut mock, false).unwrap();

        assert_eq!(mock.reports.len(), 2);
        let body = &mock.reports[0][1..];
        assert_eq!(mock.reports[0].len(), REPORT_SIZE);
        assert_eq!(&body[..4], &[0x55, 0xA1, 0xF1, 0x02]);
        assert_eq!(&mock.reports[1][1..5], &[0x55, 0xA1, 0xF1, 0x01]);
    }

    #[test]
    fn test_heartbeat_report() {
        let mut mock = MockTransport::default();
        heartbeat(&mut mock, 13, 37, 9).unwrap();
        let body = &mock.reports[0][1..];
        assert_eq!(&body[..6], &[0x55, 0xA1, 0xF2, 13, 37, 9]);
    }

    #[test]
    fn test_refresh_report_layout() {
        let mut mock = MockTransport::default();
        let rect = Rect::new(0x0123, 5, 2, 2);
        refresh(&mut mock, &rect, &[0xAABB, 0xCCDD, 0x0001, 0x1000]).unwrap();

        let body = &mock.reports[0][1..];
        assert_eq!(&body[..2], &[0x55, 0xA2]);
        // x/y little-endian, width/height single bytes
        assert_eq!(&body[2..8], &[0x23, 0x01, 0x05, 0x00, 2, 2]);
        // samples big-endian
        assert_eq!(
            &body[HEADER_SIZE..HEADER_SIZE + 8],
            &[0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x01, 0x10, 0x00]
        );
    }

    #[test]
    fn test_redraw_chunking() {
        let mut mock = MockTransport::default();
        let frame = vec![0x1234u16; 320 * 170];
        redraw(&mut mock, &frame).unwrap();

        assert_eq!(mock.reports.len(), CHUNK_COUNT);
        let mut total = 0usize;
        for (index, report) in mock.reports.iter().enumerate() {
            let body = &report[1..];
            assert_eq!(&body[..2], &[0x55, 0xA3]);
            let expected_marker = match index {
                0 => 0xF0,
                26 => 0xF2,
                _ => 0xF1,
            };
            assert_eq!(body[2], expected_marker, "chunk {index}");
            assert_eq!(body[3], (index + 1) as u8);
            let offset = u16::from_be_bytes([body[5], body[6]]);
            assert_eq!(offset as usize, (index * DATA_SIZE) & 0xFFFF);
            assert_eq!(body[7] as usize, chunk_len(index) >> 8);
            total += chunk_len(index);
        }
        // 26 full chunks plus the 2304-byte tail covers the frame exactly
        assert_eq!(total, 320 * 170 * 2);
        assert_eq!(chunk_len(0), 4096);
        assert_eq!(chunk_len(CHUNK_COUNT - 1), 2304);
    }

    #[test]
    fn test_transport_error_is_surfaced() {
        let mut mock = MockTransport {
            fail: true,
            ..MockTransport::default()
        };
        assert!(redraw(&mut mock, &[0u16; 320 * 170]).is_err());
        assert!(heartbeat(&mut mock, 0, 0, 0).is_err());
    }
}
