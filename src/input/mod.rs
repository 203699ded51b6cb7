pub mod console;
pub mod listener;
pub mod scheduler;

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::HardwareError;

pub use console::ConsoleInput;
pub use listener::WaitTickListener;
pub use scheduler::{HoldAction, HoldBinding, InputScheduler, WaitOutcome};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Button {
    Select,
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputEvent {
    Button(Button),
    Rotation(Rotation),
}

/// One non-blocking read of the input controller.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RawInput {
    pub pressed: Vec<Button>,
    pub position: i32,
}

impl RawInput {
    pub fn idle(position: i32) -> Self {
        Self {
            pressed: Vec::new(),
            position,
        }
    }

    pub fn pressing(button: Button, position: i32) -> Self {
        Self {
            pressed: vec![button],
            position,
        }
    }
}

pub trait InputSource {
    /// Brings up the controller; may report `NotReady` while the bus settles.
    fn init(&mut self) -> Result<(), HardwareError>;
    fn poll(&mut self) -> Result<RawInput, HardwareError>;
}

/// Scheduling-only elapsed time, unrelated to the trusted wall clock.
pub trait Monotonic {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemMonotonic {
    origin: Instant,
}

impl Default for SystemMonotonic {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Monotonic for SystemMonotonic {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Monotonic time that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualMonotonic {
    now: Rc<Cell<Duration>>,
}

impl ManualMonotonic {
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Monotonic for ManualMonotonic {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Replays a timeline of raw input frames, advancing a [`ManualMonotonic`]
/// by `step` on every poll. Used for simulations and tests.
#[derive(Debug)]
pub struct ScriptedInput {
    clock: ManualMonotonic,
    step: Duration,
    frames: VecDeque<(Duration, RawInput)>,
    current: RawInput,
    give_up_after: Duration,
    not_ready_polls: u32,
}

impl ScriptedInput {
    pub fn new(clock: ManualMonotonic, step: Duration) -> Self {
        Self {
            clock,
            step,
            frames: VecDeque::new(),
            current: RawInput::default(),
            give_up_after: Duration::from_secs(24 * 3_600),
            not_ready_polls: 0,
        }
    }

    /// From `at` (absolute monotonic time) onward, polls report `frame`.
    pub fn then_at(mut self, at: Duration, frame: RawInput) -> Self {
        self.frames.push_back((at, frame));
        self
    }

    /// Press `button` at `at` and release it `hold` later.
    pub fn press_at(self, at: Duration, button: Button, hold: Duration) -> Self {
        let position = self
            .frames
            .back()
            .map(|(_, frame)| frame.position)
            .unwrap_or(self.current.position);
        self.then_at(at, RawInput::pressing(button, position))
            .then_at(at + hold, RawInput::idle(position))
    }

    pub fn give_up_after(mut self, limit: Duration) -> Self {
        self.give_up_after = limit;
        self
    }

    /// The first `count` polls report `NotReady`.
    pub fn not_ready_for(mut self, count: u32) -> Self {
        self.not_ready_polls = count;
        self
    }
}

impl InputSource for ScriptedInput {
    fn init(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<RawInput, HardwareError> {
        if self.not_ready_polls > 0 {
            self.not_ready_polls -= 1;
            return Err(HardwareError::NotReady);
        }
        self.clock.advance(self.step);
        let now = self.clock.now();
        if now > self.give_up_after {
            return Err(HardwareError::Fault("input script exhausted".to_string()));
        }
        while let Some((at, _)) = self.frames.front()
            && *at <= now
        {
            if let Some((_, frame)) = self.frames.pop_front() {
                self.current = frame;
            }
        }
        Ok(self.current.clone())
    }
}
