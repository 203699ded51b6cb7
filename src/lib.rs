//! Core of a handheld baby-care logger: a cooperative input scheduler, timer
//! chimes, and an offline-first path to the remote activity log.

pub mod api;
pub mod chime;
pub mod clock;
pub mod config;
pub mod devices;
pub mod diagnostics;
pub mod error;
pub mod idle;
pub mod input;
pub mod offline;
pub mod orchestrator;
pub mod storage;
pub mod timer;
pub mod timer_screen;
pub mod util;

pub use error::{Error, ErrorKind, Result};
