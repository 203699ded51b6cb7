use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::devices::{RetryPolicy, retry_hardware};
use crate::error::{Error, Result};
use crate::input::{
    Button, InputEvent, InputSource, Monotonic, RawInput, Rotation, WaitTickListener,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HoldAction {
    Shutdown,
    Reset,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct HoldBinding {
    pub button: Button,
    pub threshold: Duration,
    pub action: HoldAction,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WaitOutcome {
    Input(InputEvent),
    /// A hold binding crossed its threshold; the caller must leave the
    /// current mode.
    Hold(HoldAction),
}

#[derive(Debug, Clone, Copy)]
struct PressState {
    button: Button,
    since: Duration,
    consumed_by_hold: bool,
}

/// Single-threaded poll loop multiplexing input and time-based listeners.
pub struct InputScheduler {
    source: Box<dyn InputSource>,
    monotonic: Box<dyn Monotonic>,
    retry: RetryPolicy,
    poll_interval: Duration,
    initialized: bool,
    listeners: Vec<WaitTickListener<'static>>,
    activity_listeners: Vec<Box<dyn FnMut()>>,
    hold_bindings: Vec<HoldBinding>,
    hold_handlers: Vec<Box<dyn FnMut(HoldAction)>>,
    pressed: Vec<PressState>,
    /// Releases seen on one poll but not yet returned.
    released: VecDeque<Button>,
    last_position: Option<i32>,
}

impl InputScheduler {
    pub fn new(source: Box<dyn InputSource>, monotonic: Box<dyn Monotonic>) -> Self {
        Self {
            source,
            monotonic,
            retry: RetryPolicy::default(),
            poll_interval: Duration::ZERO,
            initialized: false,
            listeners: Vec::new(),
            activity_listeners: Vec::new(),
            hold_bindings: Vec::new(),
            hold_handlers: Vec::new(),
            pressed: Vec::new(),
            released: VecDeque::new(),
            last_position: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sleep between polls; zero busy-polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn add_listener(&mut self, listener: WaitTickListener<'static>) {
        debug!("registered persistent {listener:?}");
        self.listeners.push(listener);
    }

    pub fn add_activity_listener(&mut self, on_activity: impl FnMut() + 'static) {
        self.activity_listeners.push(Box::new(on_activity));
    }

    pub fn add_hold_binding(&mut self, binding: HoldBinding) {
        self.hold_bindings.push(binding);
    }

    pub fn add_hold_handler(&mut self, on_hold: impl FnMut(HoldAction) + 'static) {
        self.hold_handlers.push(Box::new(on_hold));
    }

    pub fn listeners(&self) -> &[WaitTickListener<'static>] {
        &self.listeners
    }

    pub fn monotonic_now(&self) -> Duration {
        self.monotonic.now()
    }

    /// Blocks until the user produces an input event, firing due listeners
    /// (persistent first, then `extra_listeners`) in registration order.
    pub fn wait(
        &mut self,
        listen_for_buttons: bool,
        listen_for_rotation: bool,
        extra_listeners: &mut [WaitTickListener<'_>],
    ) -> Result<WaitOutcome> {
        if !listen_for_buttons && !listen_for_rotation {
            return Err(Error::config(
                "wait() must listen for buttons, rotation, or both",
            ));
        }
        self.ensure_initialized()?;

        self.reset_listeners(extra_listeners);
        if !listen_for_buttons {
            self.released.clear();
        } else if let Some(button) = self.released.pop_front() {
            return Ok(self.deliver(InputEvent::Button(button), extra_listeners));
        }
        let start = self.monotonic.now();
        loop {
            let raw = self.poll_raw()?;
            let now = self.monotonic.now();

            if let Some(action) = self.track_holds(&raw, now) {
                info!("hold detected, requesting {action:?}");
                for handler in &mut self.hold_handlers {
                    handler(action);
                }
                return Ok(WaitOutcome::Hold(action));
            }

            let event = self.map_input(&raw, listen_for_buttons, listen_for_rotation);

            let elapsed = now.saturating_sub(start);
            for listener in self.listeners.iter_mut() {
                listener.poll(elapsed);
            }
            for listener in extra_listeners.iter_mut() {
                listener.poll(elapsed);
            }

            if let Some(event) = event {
                debug!("input {event:?} after {:.3}s", elapsed.as_secs_f64());
                return Ok(self.deliver(event, extra_listeners));
            }

            if !self.poll_interval.is_zero() {
                thread::sleep(self.poll_interval);
            }
        }
    }

    fn deliver(
        &mut self,
        event: InputEvent,
        extra_listeners: &mut [WaitTickListener<'_>],
    ) -> WaitOutcome {
        for on_activity in &mut self.activity_listeners {
            on_activity();
        }
        self.reset_listeners(extra_listeners);
        WaitOutcome::Input(event)
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let source = &mut self.source;
        retry_hardware("input controller", self.retry, || source.init())?;
        let source = &mut self.source;
        let first = retry_hardware("input controller", self.retry, || source.poll())?;
        self.last_position = Some(first.position);
        self.initialized = true;
        Ok(())
    }

    fn poll_raw(&mut self) -> Result<RawInput> {
        let source = &mut self.source;
        retry_hardware("input controller", self.retry, || source.poll())
    }

    fn reset_listeners(&mut self, extra_listeners: &mut [WaitTickListener<'_>]) {
        for listener in self.listeners.iter_mut() {
            listener.reset();
        }
        for listener in extra_listeners.iter_mut() {
            listener.reset();
        }
    }

    /// Updates press bookkeeping; returns an action the first time a bound
    /// button is held past its threshold.
    fn track_holds(&mut self, raw: &RawInput, now: Duration) -> Option<HoldAction> {
        for button in &raw.pressed {
            if !self.pressed.iter().any(|state| state.button == *button) {
                self.pressed.push(PressState {
                    button: *button,
                    since: now,
                    consumed_by_hold: false,
                });
            }
        }

        for state in self.pressed.iter_mut() {
            if state.consumed_by_hold || !raw.pressed.contains(&state.button) {
                continue;
            }
            let held_for = now.saturating_sub(state.since);
            if let Some(binding) = self
                .hold_bindings
                .iter()
                .find(|binding| binding.button == state.button && held_for >= binding.threshold)
            {
                state.consumed_by_hold = true;
                return Some(binding.action);
            }
        }
        None
    }

    fn map_input(
        &mut self,
        raw: &RawInput,
        listen_for_buttons: bool,
        listen_for_rotation: bool,
    ) -> Option<InputEvent> {
        let released = &mut self.released;
        self.pressed.retain(|state| {
            let still_down = raw.pressed.contains(&state.button);
            if !still_down && !state.consumed_by_hold && listen_for_buttons {
                released.push_back(state.button);
            }
            still_down
        });

        let rotation = match self.last_position.replace(raw.position) {
            Some(last) if raw.position > last => Some(Rotation::Clockwise),
            Some(last) if raw.position < last => Some(Rotation::CounterClockwise),
            _ => None,
        };

        if let Some(button) = self.released.pop_front() {
            return Some(InputEvent::Button(button));
        }
        if listen_for_rotation && let Some(rotation) = rotation {
            return Some(InputEvent::Rotation(rotation));
        }
        None
    }
}
