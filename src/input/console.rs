//! Line-based keyboard stand-in for the rotary encoder, for running the
//! device flow on a host machine.

use std::io::{self, BufRead, BufReader};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::{debug, warn};

use crate::error::HardwareError;
use crate::input::{Button, InputSource, RawInput};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ConsoleKey {
    Press(Button),
    Turn(i32),
}

/// Maps one typed line to a key. An empty line is Select.
fn parse_key(line: &str) -> Option<ConsoleKey> {
    let key = match line.trim().to_ascii_lowercase().as_str() {
        "" | "s" | "select" => ConsoleKey::Press(Button::Select),
        "u" | "up" => ConsoleKey::Press(Button::Up),
        "d" | "down" => ConsoleKey::Press(Button::Down),
        "l" | "left" | "c" | "cancel" => ConsoleKey::Press(Button::Left),
        "r" | "right" => ConsoleKey::Press(Button::Right),
        "+" | ">" => ConsoleKey::Turn(1),
        "-" | "<" => ConsoleKey::Turn(-1),
        _ => return None,
    };
    Some(key)
}

/// Each typed line becomes one press, released on the following poll.
/// Reading happens on a background thread so polls never block; once the
/// reader hits end of input and every key is drained, polls report a fault.
pub struct ConsoleInput {
    keys: Receiver<ConsoleKey>,
    held: Option<Button>,
    position: i32,
    primed: bool,
}

impl ConsoleInput {
    pub fn spawn(reader: impl BufRead + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("console input failed: {err}");
                        return;
                    }
                };
                match parse_key(&line) {
                    Some(key) => {
                        if tx.send(key).is_err() {
                            return;
                        }
                    }
                    None => warn!("ignoring unknown key {line:?}"),
                }
            }
            debug!("console input closed");
        });
        Self::from_keys(rx)
    }

    fn from_keys(keys: Receiver<ConsoleKey>) -> Self {
        Self {
            keys,
            held: None,
            position: 0,
            primed: false,
        }
    }

    pub fn stdin() -> Self {
        Self::spawn(BufReader::new(io::stdin()))
    }
}

impl InputSource for ConsoleInput {
    fn init(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<RawInput, HardwareError> {
        // The first poll only establishes the encoder position.
        if !self.primed {
            self.primed = true;
            return Ok(RawInput::idle(self.position));
        }
        if self.held.take().is_some() {
            return Ok(RawInput::idle(self.position));
        }
        match self.keys.try_recv() {
            Ok(ConsoleKey::Press(button)) => {
                self.held = Some(button);
                Ok(RawInput::pressing(button, self.position))
            }
            Ok(ConsoleKey::Turn(step)) => {
                self.position += step;
                Ok(RawInput::idle(self.position))
            }
            Err(TryRecvError::Empty) => Ok(RawInput::idle(self.position)),
            Err(TryRecvError::Disconnected) => {
                Err(HardwareError::Fault("console input closed".to_string()))
            }
        }
    }
}
