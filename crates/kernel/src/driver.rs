// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `TerminalDriver`: the narrow capability interface to the out-of-scope
//! terminal-emulator driver. No kernel logic depends on a concrete
//! implementation; the driver is assumed thread-safe and is never locked
//! around by the kernel.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// RGB color, 0-255 per channel, as used by `modify_sessions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Which colors to set on a session; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColorUpdate {
    pub background: Option<Color>,
    pub tab: Option<Color>,
    pub cursor: Option<Color>,
}

/// Result of a screen read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenContents {
    pub lines: Vec<String>,
    pub overflowed: bool,
}

/// Split direction, pre-translated to the driver's `(vertical, before)` pair
/// used by `split_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitGeometry {
    pub vertical: bool,
    pub before: bool,
}

/// The narrow capability the kernel invokes to actually manipulate terminal
/// panes. A real implementation lives outside this crate's scope; kernel
/// code never matches on "what kind of driver is this".
pub trait TerminalDriver: Send + Sync {
    fn create(&self, name: &str, profile: Option<&str>) -> BoxFuture<'_, Result<String, KernelError>>;

    fn split(
        &self,
        session: &str,
        geometry: SplitGeometry,
        profile: Option<&str>,
    ) -> BoxFuture<'_, Result<String, KernelError>>;

    fn write(
        &self,
        session: &str,
        bytes: &[u8],
        execute_enter: bool,
        use_encoding: bool,
    ) -> BoxFuture<'_, Result<(), KernelError>>;

    fn send_control(&self, session: &str, byte: u8) -> BoxFuture<'_, Result<(), KernelError>>;

    fn read_screen(&self, session: &str, max_lines: usize) -> BoxFuture<'_, Result<ScreenContents, KernelError>>;

    fn set_colors(&self, session: &str, update: ColorUpdate) -> BoxFuture<'_, Result<(), KernelError>>;

    fn set_badge(&self, session: &str, text: &str) -> BoxFuture<'_, Result<(), KernelError>>;

    fn focus(&self, session: &str) -> BoxFuture<'_, Result<(), KernelError>>;

    fn close(&self, session: &str) -> BoxFuture<'_, Result<(), KernelError>>;
}

/// Maps `split_session`'s `direction` argument to the driver's
/// `{vertical, before}` pair.
pub fn direction_to_geometry(direction: &str) -> Result<SplitGeometry, KernelError> {
    match direction {
        "above" => Ok(SplitGeometry { vertical: false, before: true }),
        "below" => Ok(SplitGeometry { vertical: false, before: false }),
        "left" => Ok(SplitGeometry { vertical: true, before: true }),
        "right" => Ok(SplitGeometry { vertical: true, before: false }),
        other => Err(KernelError::invalid("direction", format!("unknown direction: {other}"))),
    }
}

/// Single control-character letters a-z mapped to their control code, used
/// by `send_control_character`, e.g. `c` -> 0x03 (ETX / Ctrl-C).
pub fn control_char_code(letter: char) -> Result<u8, KernelError> {
    let lower = letter.to_ascii_lowercase();
    if !lower.is_ascii_lowercase() {
        return Err(KernelError::invalid("char", "must be a single letter a-z"));
    }
    Ok((lower as u8) - b'a' + 1)
}

/// Canonical byte sequences for `send_special_key`.
pub fn special_key_bytes(key: &str) -> Result<&'static [u8], KernelError> {
    match key {
        "enter" => Ok(b"\r"),
        "tab" => Ok(b"\t"),
        "escape" => Ok(b"\x1b"),
        "up" => Ok(b"\x1b[A"),
        "down" => Ok(b"\x1b[B"),
        "right" => Ok(b"\x1b[C"),
        "left" => Ok(b"\x1b[D"),
        "backspace" => Ok(b"\x7f"),
        "home" => Ok(b"\x1b[H"),
        "end" => Ok(b"\x1b[F"),
        other => Err(KernelError::invalid("key", format!("unknown special key: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_direction_mapping_matches_table() {
        assert_eq!(direction_to_geometry("above").unwrap(), SplitGeometry { vertical: false, before: true });
        assert_eq!(direction_to_geometry("below").unwrap(), SplitGeometry { vertical: false, before: false });
        assert_eq!(direction_to_geometry("left").unwrap(), SplitGeometry { vertical: true, before: true });
        assert_eq!(direction_to_geometry("right").unwrap(), SplitGeometry { vertical: true, before: false });
        assert!(direction_to_geometry("up").is_err());
    }

    #[test]
    fn control_char_maps_c_to_etx() {
        assert_eq!(control_char_code('c').unwrap(), 0x03);
        assert_eq!(control_char_code('C').unwrap(), 0x03);
        assert!(control_char_code('1').is_err());
    }

    #[test]
    fn special_key_enter_is_cr() {
        assert_eq!(special_key_bytes("enter").unwrap(), b"\r");
        assert!(special_key_bytes("pgup").is_err());
    }
}
