use std::fmt;
use std::time::Duration;

use log::trace;

type TickCallback<'a> = Box<dyn FnMut(Duration) + 'a>;
type Guard<'a> = Box<dyn Fn() -> bool + 'a>;

/// A deadline evaluated while [`InputScheduler::wait`] polls.
///
/// `deadline` is measured from the start of the wait call. A one-shot
/// listener fires at most once per call; a recurring one fires again each
/// time `deadline` has passed since its own last firing.
///
/// [`InputScheduler::wait`]: crate::input::InputScheduler::wait
pub struct WaitTickListener<'a> {
    name: &'static str,
    deadline: Duration,
    recurring: bool,
    on_tick: TickCallback<'a>,
    guard: Option<Guard<'a>>,
    last_triggered: Option<Duration>,
}

impl<'a> WaitTickListener<'a> {
    pub fn once(deadline: Duration, on_tick: impl FnMut(Duration) + 'a) -> Self {
        Self::new(deadline, false, on_tick)
    }

    pub fn recurring(interval: Duration, on_tick: impl FnMut(Duration) + 'a) -> Self {
        Self::new(interval, true, on_tick)
    }

    fn new(deadline: Duration, recurring: bool, on_tick: impl FnMut(Duration) + 'a) -> Self {
        Self {
            name: "listener",
            deadline,
            recurring,
            on_tick: Box::new(on_tick),
            guard: None,
            last_triggered: None,
        }
    }

    /// Only fire while `guard` returns true. A skipped listener stays due.
    pub fn with_guard(mut self, guard: impl Fn() -> bool + 'a) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring
    }

    pub fn last_triggered(&self) -> Option<Duration> {
        self.last_triggered
    }

    pub fn reset(&mut self) {
        self.last_triggered = None;
    }

    fn is_due(&self, elapsed: Duration) -> bool {
        match self.last_triggered {
            None => elapsed >= self.deadline,
            Some(last) => self.recurring && elapsed.saturating_sub(last) >= self.deadline,
        }
    }

    /// Fires the listener if it is due at `elapsed` and its guard passes.
    pub(crate) fn poll(&mut self, elapsed: Duration) -> bool {
        if !self.is_due(elapsed) {
            return false;
        }
        if let Some(guard) = &self.guard
            && !guard()
        {
            return false;
        }
        trace!("firing {} at {:.3}s", self.name, elapsed.as_secs_f64());
        self.last_triggered = Some(elapsed);
        (self.on_tick)(elapsed);
        true
    }
}

impl fmt::Debug for WaitTickListener<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitTickListener")
            .field("name", &self.name)
            .field("deadline", &self.deadline)
            .field("recurring", &self.recurring)
            .field("guarded", &self.guard.is_some())
            .field("last_triggered", &self.last_triggered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn one_shot_fires_once_at_deadline() {
        let fired = RefCell::new(Vec::new());
        let mut listener = WaitTickListener::once(secs(5), |elapsed| fired.borrow_mut().push(elapsed));

        assert!(!listener.poll(secs(4)));
        assert!(listener.poll(secs(5)));
        assert!(!listener.poll(secs(10)));
        assert!(!listener.poll(secs(60)));
        drop(listener);
        assert_eq!(fired.into_inner(), vec![secs(5)]);
    }

    #[test]
    fn recurring_measures_from_its_own_last_firing() {
        let count = Cell::new(0);
        let mut listener = WaitTickListener::recurring(secs(30), |_| count.set(count.get() + 1));

        assert!(listener.poll(secs(31)));
        assert!(!listener.poll(secs(60)));
        assert!(listener.poll(secs(61)));
        assert_eq!(listener.last_triggered(), Some(secs(61)));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn guard_blocks_without_consuming_the_deadline() {
        let allowed = Cell::new(false);
        let count = Cell::new(0);
        let mut listener = WaitTickListener::once(secs(1), |_| count.set(count.get() + 1))
            .with_guard(|| allowed.get())
            .named("guarded");

        assert!(!listener.poll(secs(2)));
        allowed.set(true);
        assert!(listener.poll(secs(3)));
        assert_eq!(count.get(), 1);
        assert_eq!(listener.name(), "guarded");
    }

    #[test]
    fn reset_rearms_a_one_shot() {
        let mut listener = WaitTickListener::once(secs(1), |_| {});
        assert!(listener.poll(secs(1)));
        listener.reset();
        assert!(listener.poll(secs(1)));
    }
}
