//! Listeners registered once on the scheduler and active on every screen:
//! backlight dimming, idle reminders, battery display and idle shutdown.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info};

use crate::devices::{Backlight, SharedBattery, SharedUi, Tone, UiCommand};
use crate::input::{InputScheduler, WaitTickListener};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleSettings {
    pub backlight_dim: Duration,
    pub idle_warning: Duration,
    pub battery_refresh: Duration,
    pub idle_shutdown: Option<Duration>,
}

/// Shared handles the idle listeners act on.
#[derive(Clone)]
pub struct IdleHandles {
    pub ui: SharedUi,
    pub battery: Option<SharedBattery>,
    /// Set while a timer runs, so a long feeding doesn't nag or power off.
    pub suppress_idle_warning: Rc<Cell<bool>>,
    pub shutdown_requested: Rc<Cell<bool>>,
}

impl IdleHandles {
    pub fn new(ui: SharedUi, battery: Option<SharedBattery>) -> Self {
        Self {
            ui,
            battery,
            suppress_idle_warning: Rc::new(Cell::new(false)),
            shutdown_requested: Rc::new(Cell::new(false)),
        }
    }
}

pub fn standard_listeners(
    settings: &IdleSettings,
    handles: &IdleHandles,
) -> Vec<WaitTickListener<'static>> {
    let mut listeners = Vec::new();

    let dim_ui = Rc::clone(&handles.ui);
    let guard_ui = Rc::clone(&handles.ui);
    listeners.push(
        WaitTickListener::once(settings.backlight_dim, move |_| {
            dim_ui
                .borrow_mut()
                .send(UiCommand::Backlight(Backlight::Dim));
        })
        .with_guard(move || guard_ui.borrow().backlight() == Backlight::Default)
        .named("backlight dim"),
    );

    let warn_ui = Rc::clone(&handles.ui);
    let suppress = Rc::clone(&handles.suppress_idle_warning);
    listeners.push(
        WaitTickListener::recurring(settings.idle_warning, move |elapsed| {
            debug!("idle for {}s", elapsed.as_secs());
            warn_ui.borrow_mut().send(UiCommand::Tone(Tone::IdleWarning));
        })
        .with_guard(move || !suppress.get())
        .named("idle warning"),
    );

    if let Some(battery) = handles.battery.clone() {
        let battery_ui = Rc::clone(&handles.ui);
        let mut last_shown = None;
        listeners.push(
            WaitTickListener::recurring(settings.battery_refresh, move |_| {
                let percent = battery.borrow_mut().get_percent();
                if percent != last_shown {
                    last_shown = percent;
                    if let Some(percent) = percent {
                        battery_ui.borrow_mut().send(UiCommand::ShowBattery(percent));
                    }
                }
            })
            .named("battery refresh"),
        );
    }

    if let Some(idle_shutdown) = settings.idle_shutdown {
        let shutdown = Rc::clone(&handles.shutdown_requested);
        let suppress = Rc::clone(&handles.suppress_idle_warning);
        listeners.push(
            WaitTickListener::once(idle_shutdown, move |_| {
                info!("idle too long, requesting shutdown");
                shutdown.set(true);
            })
            .with_guard(move || !suppress.get())
            .named("idle shutdown"),
        );
    }

    listeners
}

/// Registers the standard listeners plus the activity listener that brings
/// a dimmed backlight back.
pub fn install(scheduler: &mut InputScheduler, settings: &IdleSettings, handles: &IdleHandles) {
    for listener in standard_listeners(settings, handles) {
        scheduler.add_listener(listener);
    }
    let ui = Rc::clone(&handles.ui);
    scheduler.add_activity_listener(move || {
        let dimmed = ui.borrow().backlight() == Backlight::Dim;
        if dimmed {
            ui.borrow_mut().send(UiCommand::Backlight(Backlight::Default));
        }
    });
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::devices::{Battery, RecordingUi, RetryPolicy};
    use crate::input::{Button, ManualMonotonic, ScriptedInput, WaitOutcome};

    struct DrainingBattery {
        readings: Vec<u8>,
    }

    impl Battery for DrainingBattery {
        fn get_percent(&mut self) -> Option<u8> {
            if self.readings.len() > 1 {
                Some(self.readings.remove(0))
            } else {
                self.readings.first().copied()
            }
        }

        fn is_charging(&mut self) -> bool {
            false
        }
    }

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    fn settings() -> IdleSettings {
        IdleSettings {
            backlight_dim: secs(30),
            idle_warning: secs(180),
            battery_refresh: secs(30),
            idle_shutdown: Some(secs(600)),
        }
    }

    fn setup(
        script: impl FnOnce(ScriptedInput) -> ScriptedInput,
        battery: Option<SharedBattery>,
    ) -> (InputScheduler, Rc<RefCell<RecordingUi>>, IdleHandles) {
        let clock = ManualMonotonic::default();
        let input = script(
            ScriptedInput::new(clock.clone(), Duration::from_millis(500))
                .give_up_after(secs(7_200)),
        );
        let mut scheduler = InputScheduler::new(Box::new(input), Box::new(clock))
            .with_retry_policy(RetryPolicy::immediate(3));
        let ui = Rc::new(RefCell::new(RecordingUi::default()));
        let handles = IdleHandles::new(ui.clone(), battery);
        install(&mut scheduler, &settings(), &handles);
        (scheduler, ui, handles)
    }

    #[test]
    fn standard_listener_order() {
        let ui: SharedUi = Rc::new(RefCell::new(RecordingUi::default()));
        let battery: SharedBattery = Rc::new(RefCell::new(DrainingBattery { readings: vec![50] }));
        let handles = IdleHandles::new(ui, Some(battery));
        let names: Vec<_> = standard_listeners(&settings(), &handles)
            .iter()
            .map(WaitTickListener::name)
            .collect();
        assert_eq!(
            names,
            vec!["backlight dim", "idle warning", "battery refresh", "idle shutdown"]
        );
    }

    #[test]
    fn backlight_dims_then_recovers_on_input() {
        let (mut scheduler, ui, _handles) =
            setup(|input| input.press_at(secs(45), Button::Up, secs(1)), None);
        let outcome = scheduler.wait(true, false, &mut []).expect("input");
        assert_eq!(outcome, WaitOutcome::Input(crate::input::InputEvent::Button(Button::Up)));
        assert_eq!(
            ui.borrow().commands(),
            &[
                UiCommand::Backlight(Backlight::Dim),
                UiCommand::Backlight(Backlight::Default)
            ]
        );
    }

    #[test]
    fn idle_warning_repeats_and_shutdown_is_requested() {
        let (mut scheduler, ui, handles) =
            setup(|input| input.press_at(secs(700), Button::Select, secs(1)), None);
        scheduler.wait(true, false, &mut []).expect("input");
        assert_eq!(
            ui.borrow().tones(),
            vec![Tone::IdleWarning, Tone::IdleWarning, Tone::IdleWarning]
        );
        assert!(handles.shutdown_requested.get());
    }

    #[test]
    fn running_timer_suppresses_warnings_and_shutdown() {
        let (mut scheduler, ui, handles) =
            setup(|input| input.press_at(secs(700), Button::Select, secs(1)), None);
        handles.suppress_idle_warning.set(true);
        scheduler.wait(true, false, &mut []).expect("input");
        assert!(ui.borrow().tones().is_empty());
        assert!(!handles.shutdown_requested.get());
    }

    #[test]
    fn battery_is_shown_only_when_it_changes() {
        let battery: SharedBattery = Rc::new(RefCell::new(DrainingBattery {
            readings: vec![80, 80, 79, 79],
        }));
        let (mut scheduler, ui, _handles) =
            setup(|input| input.press_at(secs(130), Button::Up, secs(1)), Some(battery));
        scheduler.wait(true, false, &mut []).expect("input");
        let shown: Vec<_> = ui
            .borrow()
            .commands()
            .iter()
            .filter_map(|command| match command {
                UiCommand::ShowBattery(percent) => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(shown, vec![80, 79]);
    }
}
