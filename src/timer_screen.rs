use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use log::debug;

use crate::chime::PeriodicChime;
use crate::devices::{SharedUi, Tone, UiCommand};
use crate::error::Result;
use crate::input::{Button, HoldAction, InputEvent, InputScheduler, WaitOutcome, WaitTickListener};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimerScreenOutcome {
    Save { elapsed_secs: u64 },
    Cancel,
    Hold(HoldAction),
}

/// Shows a running timer until the user saves or cancels it.
pub struct ActiveTimerScreen {
    ui: SharedUi,
    suppress_idle_warning: Option<Rc<Cell<bool>>>,
}

impl ActiveTimerScreen {
    pub fn new(ui: SharedUi) -> Self {
        Self {
            ui,
            suppress_idle_warning: None,
        }
    }

    /// Idle warnings are muted while the screen is up.
    pub fn with_idle_suppression(mut self, flag: Rc<Cell<bool>>) -> Self {
        self.suppress_idle_warning = Some(flag);
        self
    }

    /// `start_at` preloads the display, e.g. with a resumed timer's elapsed
    /// seconds. Select saves, Left cancels.
    pub fn run(
        &self,
        scheduler: &mut InputScheduler,
        mut chime: Option<Box<dyn PeriodicChime>>,
        start_at: u64,
        after_idle_for: Option<WaitTickListener<'_>>,
    ) -> Result<TimerScreenOutcome> {
        let origin = scheduler.monotonic_now();
        if let Some(chime) = chime.as_mut() {
            chime.start(origin);
        }
        let offset = Cell::new(Duration::ZERO);
        let ui = Rc::clone(&self.ui);
        ui.borrow_mut().send(UiCommand::ShowElapsed(start_at));

        let mut listeners = vec![
            WaitTickListener::recurring(Duration::from_secs(1), |elapsed| {
                let shown = offset.get() + elapsed;
                ui.borrow_mut()
                    .send(UiCommand::ShowElapsed(start_at + shown.as_secs()));
                if let Some(chime) = chime.as_mut()
                    && chime.chime_if_needed(origin + shown)
                {
                    ui.borrow_mut().send(UiCommand::Tone(Tone::Chime));
                }
            })
            .named("elapsed display"),
        ];
        listeners.extend(after_idle_for);

        let _suppressed = self.suppress_idle_warning.as_ref().map(IdleSuppression::new);
        loop {
            offset.set(scheduler.monotonic_now().saturating_sub(origin));
            let outcome = scheduler.wait(true, false, &mut listeners)?;
            let elapsed_secs = start_at
                + scheduler
                    .monotonic_now()
                    .saturating_sub(origin)
                    .as_secs();
            match outcome {
                WaitOutcome::Hold(action) => return Ok(TimerScreenOutcome::Hold(action)),
                WaitOutcome::Input(InputEvent::Button(Button::Select)) => {
                    return Ok(TimerScreenOutcome::Save { elapsed_secs });
                }
                WaitOutcome::Input(InputEvent::Button(Button::Left)) => {
                    return Ok(TimerScreenOutcome::Cancel);
                }
                WaitOutcome::Input(other) => debug!("timer screen ignores {other:?}"),
            }
        }
    }
}

/// Raises the flag for as long as it lives.
struct IdleSuppression<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> IdleSuppression<'a> {
    fn new(flag: &'a Rc<Cell<bool>>) -> Self {
        Self {
            flag,
            previous: flag.replace(true),
        }
    }
}

impl Drop for IdleSuppression<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}
