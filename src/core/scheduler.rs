// src/core/scheduler.rs

//! # Scheduler
//!
//! A flat list of [`Schedulable`] units advanced by [`Scheduler::tick`]. Time is logical: it
//! only moves when the host ticks, so tests drive it deterministically.
//!
//! Units may be added or cancelled from any thread. Worker threads never touch the list
//! directly, though: async completions and callbacks are posted to an inbox that is drained
//! at the start of the next tick, on the ticking thread.

use crate::core::commons::lock;
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    time::Duration,
};

pub type Action = Arc<Mutex<dyn FnMut() + Send>>;
type Callback = Box<dyn FnOnce() + Send>;

/// When a unit fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Fires once after its delay, then is removed.
    Once,
    /// Fires every period; the countdown is reset by the period after each firing.
    Every(Duration),
}

/// Where a unit's action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// On the ticking thread, during the tick.
    Inline,
    /// On a pool worker. At most one run of a unit is in flight at a time.
    Worker,
}

/// A countdown plus the action it triggers.
pub struct Schedulable {
    delay: Duration,
    timing: Timing,
    dispatch: Dispatch,
    action: Action,
}

impl fmt::Debug for Schedulable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedulable")
            .field("delay", &self.delay)
            .field("timing", &self.timing)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

impl Schedulable {
    pub fn once(delay: Duration, action: impl FnMut() + Send + 'static) -> Self {
        Self {
            delay,
            timing: Timing::Once,
            dispatch: Dispatch::Inline,
            action: Arc::new(Mutex::new(action)),
        }
    }

    /// Fires first after one `period`, then every `period`.
    pub fn repeating(period: Duration, action: impl FnMut() + Send + 'static) -> Self {
        Self {
            delay: period,
            timing: Timing::Every(period),
            dispatch: Dispatch::Inline,
            action: Arc::new(Mutex::new(action)),
        }
    }

    /// Wraps the unit so its action runs on a background worker.
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.dispatch = Dispatch::Worker;
        self
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }
}

/// Cancels a scheduled unit. Cancelled units are dropped on the next tick.
#[derive(Debug, Clone)]
pub struct UnitHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl UnitHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Unit {
    id: u64,
    /// Nanoseconds until the next firing; fires at or below zero.
    countdown: i128,
    timing: Timing,
    dispatch: Dispatch,
    action: Action,
    cancelled: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
}

enum Message {
    Completed(u64),
    Callback(Callback),
}

/// Posts work back onto the ticking thread. Cheap to clone and safe to move into workers.
#[derive(Clone)]
pub struct Inbox {
    sender: Sender<Message>,
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Inbox")
    }
}

impl Inbox {
    /// Runs `callback` at the start of the next tick. Dropped silently if the scheduler is gone.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) {
        let _ = self.sender.send(Message::Callback(Box::new(callback)));
    }
}

struct Fire {
    id: u64,
    dispatch: Dispatch,
    action: Action,
    in_flight: Arc<AtomicBool>,
}

pub struct Scheduler {
    units: Mutex<Vec<Unit>>,
    next_id: AtomicU64,
    now_nanos: AtomicU64,
    sender: Sender<Message>,
    receiver: Mutex<Receiver<Message>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("units", &self.len())
            .field("now", &self.now())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            units: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            now_nanos: AtomicU64::new(0),
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Total logical time elapsed across all ticks.
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos.load(Ordering::Acquire))
    }

    pub fn inbox(&self) -> Inbox {
        Inbox {
            sender: self.sender.clone(),
        }
    }

    pub fn schedule(&self, schedulable: Schedulable) -> UnitHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let unit = Unit {
            id,
            countdown: i128::try_from(schedulable.delay.as_nanos()).unwrap_or(i128::MAX),
            timing: schedulable.timing,
            dispatch: schedulable.dispatch,
            action: schedulable.action,
            cancelled: Arc::clone(&cancelled),
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        lock(&self.units).push(unit);
        log::trace!("Scheduled unit #{} ({:?}).", id, schedulable.timing);
        UnitHandle { id, cancelled }
    }

    /// Number of units still in the list, cancelled ones included until the next tick.
    pub fn len(&self) -> usize {
        lock(&self.units).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every unit. Pending inbox messages are discarded.
    pub fn clear(&self) {
        for unit in lock(&self.units).drain(..) {
            unit.cancelled.store(true, Ordering::Release);
        }
        let receiver = lock(&self.receiver);
        while receiver.try_recv().is_ok() {}
    }

    /// Advances logical time by `elapsed` and fires everything that came due.
    ///
    /// Order: inbox messages first, then due units in list order. Actions run with the unit
    /// list unlocked, so they may schedule or cancel freely.
    pub fn tick(&self, elapsed: Duration) {
        let elapsed_nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.now_nanos.fetch_add(elapsed_nanos, Ordering::AcqRel);

        self.drain_inbox();

        let due = self.collect_due(i128::from(elapsed_nanos));
        for fire in due {
            self.fire(fire);
        }
    }

    fn drain_inbox(&self) {
        let messages: Vec<Message> = {
            let receiver = lock(&self.receiver);
            receiver.try_iter().collect()
        };
        for message in messages {
            match message {
                Message::Completed(id) => {
                    if let Some(unit) = lock(&self.units).iter().find(|u| u.id == id) {
                        unit.in_flight.store(false, Ordering::Release);
                    }
                }
                Message::Callback(callback) => {
                    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                        log::error!("A scheduler callback panicked; it was discarded.");
                    }
                }
            }
        }
    }

    fn collect_due(&self, elapsed: i128) -> Vec<Fire> {
        let mut units = lock(&self.units);
        let mut due = Vec::new();
        for unit in units.iter_mut() {
            if unit.cancelled.load(Ordering::Acquire) {
                continue;
            }
            unit.countdown -= elapsed;
            if unit.countdown > 0 {
                continue;
            }
            due.push(Fire {
                id: unit.id,
                dispatch: unit.dispatch,
                action: Arc::clone(&unit.action),
                in_flight: Arc::clone(&unit.in_flight),
            });
            match unit.timing {
                Timing::Once => unit.cancelled.store(true, Ordering::Release),
                Timing::Every(period) => {
                    let period = i128::try_from(period.as_nanos()).unwrap_or(i128::MAX);
                    unit.countdown += period.max(1);
                }
            }
        }
        units.retain(|unit| !unit.cancelled.load(Ordering::Acquire));
        due
    }

    fn fire(&self, fire: Fire) {
        match fire.dispatch {
            Dispatch::Inline => run_action(&fire.action, fire.id),
            Dispatch::Worker => {
                if fire.in_flight.swap(true, Ordering::AcqRel) {
                    log::trace!("Unit #{} is still running on a worker; skipped.", fire.id);
                    return;
                }
                let sender = self.sender.clone();
                rayon::spawn(move || {
                    run_action(&fire.action, fire.id);
                    let _ = sender.send(Message::Completed(fire.id));
                });
            }
        }
    }
}

fn run_action(action: &Action, id: u64) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut action = lock(action);
        (*action)();
    }));
    if result.is_err() {
        log::error!("Scheduled unit #{} panicked.", id);
    }
}
