//! Background scheduling: the announce loop and the refresh loop.
//!
//! Each loop runs on its own thread and sleeps in bounded steps by waiting on
//! a stop channel. Shutdown drops the only sender, which disconnects the
//! channel and wakes both loops at once. Joining is bounded; a loop that does
//! not finish in time is detached.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use pagenode_config::{log_sched_debug, log_sched_info, log_sched_warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::Result;

/// Longest single sleep of either loop
pub const MAX_WAIT: Duration = Duration::from_secs(60);
/// Shortest sleep between announce attempts
pub const MIN_ANNOUNCE_WAIT: Duration = Duration::from_secs(1);
/// Shortest sleep between refresh checks
pub const MIN_REFRESH_WAIT: Duration = Duration::from_millis(500);

const ANNOUNCE_THREAD: &str = "announce";
const REFRESH_THREAD: &str = "refresh";

/// Work the loops delegate to. The scheduler itself owns only timing.
pub trait ScheduledWork: Send + Sync + 'static {
    fn announce(&self) -> Result<()>;
    fn refresh_pages(&self) -> Result<()>;
    fn refresh_files(&self) -> Result<()>;
}

/// Loop cadence. Zero disables the periodic action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Zero announces once, at startup
    pub announce: Duration,
    pub page_refresh: Duration,
    pub file_refresh: Duration,
}

#[derive(Debug)]
struct Clock {
    /// None until the first successful announce
    last_announce: Option<Instant>,
    last_page_refresh: Instant,
    last_file_refresh: Instant,
}

/// Signals the shutdown waiter when a loop thread exits, panics included
struct ExitNotice {
    done: Sender<&'static str>,
    name: &'static str,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.done.send(self.name);
    }
}

struct LoopContext<W> {
    work: Arc<W>,
    intervals: Intervals,
    clock: Arc<Mutex<Clock>>,
    stop_rx: Receiver<()>,
    stopped: Arc<AtomicBool>,
}

impl<W> LoopContext<W> {
    /// Sleep for `wait` or until stopped. Returns false once stopped.
    fn sleep(&self, wait: Duration) -> bool {
        match self.stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => !self.stopped.load(Ordering::Acquire),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Scheduler {
    stop_tx: Mutex<Option<Sender<()>>>,
    stopped: Arc<AtomicBool>,
    clock: Arc<Mutex<Clock>>,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    done_rx: Receiver<&'static str>,
}

impl Scheduler {
    /// Spawn both loops. The first announce happens immediately; refresh
    /// timers start counting now.
    pub fn start<W: ScheduledWork>(work: Arc<W>, intervals: Intervals) -> io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = unbounded();
        let stopped = Arc::new(AtomicBool::new(false));
        let now = Instant::now();
        let clock = Arc::new(Mutex::new(Clock {
            last_announce: None,
            last_page_refresh: now,
            last_file_refresh: now,
        }));

        let context = |work: &Arc<W>| LoopContext {
            work: work.clone(),
            intervals,
            clock: clock.clone(),
            stop_rx: stop_rx.clone(),
            stopped: stopped.clone(),
        };

        let mut handles = Vec::with_capacity(2);

        let announce_ctx = context(&work);
        let notice = ExitNotice {
            done: done_tx.clone(),
            name: ANNOUNCE_THREAD,
        };
        let spawned = thread::Builder::new()
            .name(ANNOUNCE_THREAD.to_string())
            .spawn(move || {
                let _notice = notice;
                announce_loop(&announce_ctx);
            });
        // On a failed spawn the stop sender is dropped with this frame, so
        // any loop already running exits on its own
        handles.push((ANNOUNCE_THREAD, spawned?));

        let refresh_ctx = context(&work);
        let notice = ExitNotice {
            done: done_tx,
            name: REFRESH_THREAD,
        };
        let spawned = thread::Builder::new()
            .name(REFRESH_THREAD.to_string())
            .spawn(move || {
                let _notice = notice;
                refresh_loop(&refresh_ctx);
            });
        handles.push((REFRESH_THREAD, spawned?));

        log_sched_info!(
            "Scheduler started",
            announce_secs = intervals.announce.as_secs(),
            page_refresh_secs = intervals.page_refresh.as_secs(),
            file_refresh_secs = intervals.file_refresh.as_secs()
        );

        Ok(Self {
            stop_tx: Mutex::new(Some(stop_tx)),
            stopped,
            clock,
            handles: Mutex::new(handles),
            done_rx,
        })
    }

    /// Signal both loops and wait up to `timeout` for them to exit.
    ///
    /// Idempotent. Returns true when every loop thread was joined; loops still
    /// running at the deadline are detached.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.stopped.store(true, Ordering::Release);
        drop(
            self.stop_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let mut pending =
            std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = Instant::now() + timeout;

        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Ok(name) = self.done_rx.recv_timeout(remaining) else {
                break;
            };
            if let Some(index) = pending.iter().position(|(n, _)| *n == name) {
                let (name, handle) = pending.swap_remove(index);
                if handle.join().is_err() {
                    log_sched_warn!("Loop thread panicked", thread = name);
                }
            }
        }

        for (name, _) in &pending {
            log_sched_warn!("Loop did not stop in time, detaching", thread = name);
        }
        pending.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Time of the last successful announce
    pub fn last_announce(&self) -> Option<Instant> {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_announce
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Never block in drop; loops see the disconnect and exit
        self.stopped.store(true, Ordering::Release);
        drop(
            self.stop_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }
}

fn announce_loop<W: ScheduledWork>(ctx: &LoopContext<W>) {
    let interval = ctx.intervals.announce;

    loop {
        if ctx.is_stopped() {
            break;
        }

        let due = match ctx.clock().last_announce {
            None => true,
            Some(last) => !interval.is_zero() && last.elapsed() >= interval,
        };
        if due {
            match ctx.work.announce() {
                Ok(()) => {
                    ctx.clock().last_announce = Some(Instant::now());
                    log_sched_debug!("Announced");
                }
                Err(e) => log_sched_warn!("Announce failed", error = e),
            }
        }

        let wait = match ctx.clock().last_announce {
            // Retry a failed first announce soon
            None => MIN_ANNOUNCE_WAIT,
            Some(_) if interval.is_zero() => MAX_WAIT,
            Some(last) => interval.saturating_sub(last.elapsed()),
        };
        if !ctx.sleep(wait.clamp(MIN_ANNOUNCE_WAIT, MAX_WAIT)) {
            break;
        }
    }

    log_sched_debug!("Announce loop stopped");
}

fn refresh_loop<W: ScheduledWork>(ctx: &LoopContext<W>) {
    let Intervals {
        page_refresh,
        file_refresh,
        ..
    } = ctx.intervals;

    loop {
        if ctx.is_stopped() {
            break;
        }

        let (pages_due, files_due) = {
            let clock = ctx.clock();
            (
                !page_refresh.is_zero() && clock.last_page_refresh.elapsed() >= page_refresh,
                !file_refresh.is_zero() && clock.last_file_refresh.elapsed() >= file_refresh,
            )
        };

        // The timestamp moves even when a pass fails, so a broken root is
        // retried on the next interval rather than in a tight loop
        if pages_due {
            if let Err(e) = ctx.work.refresh_pages() {
                log_sched_warn!("Page refresh failed", error = e);
            }
            ctx.clock().last_page_refresh = Instant::now();
        }
        if files_due && !ctx.is_stopped() {
            if let Err(e) = ctx.work.refresh_files() {
                log_sched_warn!("File refresh failed", error = e);
            }
            ctx.clock().last_file_refresh = Instant::now();
        }

        let wait = {
            let clock = ctx.clock();
            [
                (page_refresh, clock.last_page_refresh),
                (file_refresh, clock.last_file_refresh),
            ]
            .into_iter()
            .filter(|(interval, _)| !interval.is_zero())
            .map(|(interval, last)| {
                interval
                    .saturating_sub(last.elapsed())
                    .max(MIN_REFRESH_WAIT)
            })
            .min()
            .unwrap_or(MAX_WAIT)
        };
        if !ctx.sleep(wait.min(MAX_WAIT)) {
            break;
        }
    }

    log_sched_debug!("Refresh loop stopped");
}
