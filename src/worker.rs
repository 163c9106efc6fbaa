//! Panel worker: a long-running thread that owns the display transport and
//! drains a job queue at its own pace, decoupled from the render cadence.
//!
//! Scheduling rules per tick:
//! - keepalive first: with jobs queued, a due heartbeat runs before the next
//!   job;
//! - with an empty queue, a heartbeat goes out once the device has been idle
//!   longer than the refresh interval;
//! - the job following a redraw waits out the refresh interval so the
//!   transport is not saturated right after a full-frame transfer;
//! - consecutive update jobs drain back-to-back so a dirty-region batch
//!   stays coherent.
//!
//! Transport errors are logged and the job counts as complete; the panel
//! recovers on the next heartbeat. Failing to open the transport at startup
//! kills this worker only — rendering continues without device output.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, Timelike};
use log::{debug, error, info};

use crate::panel::{self, HidTransport, PanelTransport};
use crate::surface::Rect;

const POLL_TICK: Duration = Duration::from_millis(10);
const START_COOL_DOWN: Duration = Duration::from_millis(1000);

/// One unit of device work. Pixel buffers are moved in whole; the sender
/// gives up ownership on send.
pub enum PanelJob {
    Redraw {
        pixels: Vec<u16>,
    },
    Update {
        rect: Rect,
        pixels: Vec<u16>,
    },
    Orientation {
        portrait: bool,
    },
    Heartbeat,
    /// Live timing adjustment; zero fields keep the current value. `poll_ms`
    /// paces the render loop and is carried here only so one message updates
    /// the whole timing set.
    Config {
        poll_ms: u64,
        refresh_ms: u64,
        heartbeat_ms: u64,
    },
}

/// Completion notice back to the render side. Heartbeats and orientation
/// changes only touch internal timers and are not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDone {
    Redraw,
    Update,
}

#[derive(Debug, Clone)]
pub struct WorkerTiming {
    pub refresh: Duration,
    pub heartbeat: Duration,
}

impl WorkerTiming {
    pub fn new(refresh_ms: u64, heartbeat_ms: u64) -> Self {
        Self {
            refresh: Duration::from_millis(refresh_ms),
            heartbeat: Duration::from_millis(heartbeat_ms),
        }
    }
}

struct WorkerState {
    queue: VecDeque<PanelJob>,
    last_activity: Instant,
    last_heartbeat: Instant,
    refresh: Duration,
    heartbeat: Duration,
    last_was_redraw: bool,
}

impl WorkerState {
    fn new(timing: &WorkerTiming) -> Self {
        Self {
            queue: VecDeque::new(),
            last_activity: Instant::now(),
            last_heartbeat: Instant::now(),
            refresh: timing.refresh,
            heartbeat: timing.heartbeat,
            last_was_redraw: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Executed {
    Idle,
    Heartbeat,
    Redraw,
    Update,
    Orientation,
}

pub fn spawn(
    vendor_id: u16,
    product_id: u16,
    timing: WorkerTiming,
    jobs: Receiver<PanelJob>,
    done: Sender<JobDone>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let transport = match HidTransport::open(vendor_id, product_id) {
            Ok(transport) => transport,
            Err(err) => {
                error!("panel worker: {err}");
                return;
            }
        };
        // the panel needs a moment after enumeration before it accepts
        // reports
        thread::sleep(START_COOL_DOWN);
        run(transport, timing, jobs, done);
    })
}

fn run<T: PanelTransport>(
    mut transport: T,
    timing: WorkerTiming,
    jobs: Receiver<PanelJob>,
    done: Sender<JobDone>,
) {
    info!("panel worker: started");
    let mut state = WorkerState::new(&timing);

    loop {
        loop {
            match jobs.try_recv() {
                Ok(PanelJob::Config {
                    poll_ms: _,
                    refresh_ms,
                    heartbeat_ms,
                }) => {
                    if refresh_ms > 0 {
                        state.refresh = Duration::from_millis(refresh_ms);
                    }
                    if heartbeat_ms > 0 {
                        state.heartbeat = Duration::from_millis(heartbeat_ms);
                    }
                }
                Ok(job) => state.queue.push_back(job),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("panel worker: stopping");
                    return;
                }
            }
        }

        match next(&mut transport, &mut state) {
            Executed::Idle => {}
            executed => {
                match executed {
                    Executed::Heartbeat => state.last_heartbeat = Instant::now(),
                    Executed::Redraw => {
                        let _ = done.send(JobDone::Redraw);
                    }
                    Executed::Update => {
                        let _ = done.send(JobDone::Update);
                    }
                    Executed::Orientation | Executed::Idle => {}
                }
                state.last_was_redraw = executed == Executed::Redraw;
                state.last_activity = Instant::now();
            }
        }

        thread::sleep(POLL_TICK);
    }
}

fn next<T: PanelTransport>(transport: &mut T, state: &mut WorkerState) -> Executed {
    let now = Instant::now();
    if !state.queue.is_empty() {
        if now.duration_since(state.last_heartbeat) > state.heartbeat {
            // keepalive outranks pending work
            run_heartbeat(transport, state)
        } else {
            match state.queue.pop_front() {
                Some(job) => execute(transport, state, job),
                None => Executed::Idle,
            }
        }
    } else if now.duration_since(state.last_activity) > state.refresh {
        run_heartbeat(transport, state)
    } else {
        Executed::Idle
    }
}

fn execute<T: PanelTransport>(transport: &mut T, state: &mut WorkerState, job: PanelJob) -> Executed {
    match job {
        PanelJob::Redraw { pixels } => {
            if let Err(err) = panel::redraw(transport, &pixels) {
                debug!("panel worker: redraw failed: {err}");
            }
            Executed::Redraw
        }
        PanelJob::Update {
            mut rect,
            mut pixels,
        } => {
            pace_after_redraw(state);
            loop {
                if let Err(err) = panel::refresh(transport, &rect, &pixels) {
                    debug!("panel worker: update failed: {err}");
                }
                // keep the batch together: pull the next queued update
                // without yielding back to the scheduler
                match state.queue.front() {
                    Some(PanelJob::Update { .. }) => {
                        if let Some(PanelJob::Update {
                            rect: next_rect,
                            pixels: next_pixels,
                        }) = state.queue.pop_front()
                        {
                            rect = next_rect;
                            pixels = next_pixels;
                            continue;
                        }
                        break;
                    }
                    _ => break,
                }
            }
            Executed::Update
        }
        PanelJob::Orientation { portrait } => {
            pace_after_redraw(state);
            if let Err(err) = panel::set_orientation(transport, portrait) {
                debug!("panel worker: orientation failed: {err}");
            }
            Executed::Orientation
        }
        PanelJob::Heartbeat => run_heartbeat(transport, state),
        PanelJob::Config { .. } => Executed::Idle,
    }
}

fn run_heartbeat<T: PanelTransport>(transport: &mut T, state: &mut WorkerState) -> Executed {
    pace_after_redraw(state);
    let now = Local::now();
    if let Err(err) = panel::heartbeat(
        transport,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    ) {
        debug!("panel worker: heartbeat failed: {err}");
    }
    Executed::Heartbeat
}

// A full-frame transfer leaves the panel busy; give it a refresh interval
// before the next command.
fn pace_after_redraw(state: &mut WorkerState) {
    if state.last_was_redraw {
        thread::sleep(state.refresh);
        state.last_was_redraw = false;
    }
}
