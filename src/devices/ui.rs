use std::cell::RefCell;
use std::rc::Rc;

use log::info;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Backlight {
    Default,
    Dim,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Tone {
    Chime,
    IdleWarning,
    LowBattery,
    Info,
    Error,
    Success,
    Motd,
    Shutdown,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UiCommand {
    Backlight(Backlight),
    Tone(Tone),
    Status(String),
    Message(String),
    ShowElapsed(u64),
    ShowBattery(u8),
    Progress { index: usize, count: usize },
}

/// Display and audio sink. Commands are fire-and-forget; nothing is read
/// back except the backlight state the idle listeners guard on.
pub trait Ui {
    fn send(&mut self, command: UiCommand);
    fn backlight(&self) -> Backlight;
}

pub type SharedUi = Rc<RefCell<dyn Ui>>;

/// Keeps every command it receives and logs it; used by the host binary and
/// by tests.
#[derive(Debug, Clone)]
pub struct RecordingUi {
    commands: Vec<UiCommand>,
    backlight: Backlight,
}

impl Default for RecordingUi {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            backlight: Backlight::Default,
        }
    }
}

impl RecordingUi {
    pub fn commands(&self) -> &[UiCommand] {
        &self.commands
    }

    pub fn tones(&self) -> Vec<Tone> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                UiCommand::Tone(tone) => Some(*tone),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl Ui for RecordingUi {
    fn send(&mut self, command: UiCommand) {
        info!("ui: {command:?}");
        if let UiCommand::Backlight(backlight) = command {
            self.backlight = backlight;
        }
        self.commands.push(command);
    }

    fn backlight(&self) -> Backlight {
        self.backlight
    }
}
