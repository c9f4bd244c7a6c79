//! Display sinks and fixed-field rendering.
//!
//! The display payload carries three NUL-terminated ASCII fields in fixed
//! capacities. Rendering always NUL-terminates and truncates like `snprintf`
//! so a field can never run into its neighbor.

use std::borrow::Cow;

use chrono::Local;
use tracing::info;

use crate::wire::{DisplayData, DISPLAY_TEMPERATURE_LEN, DISPLAY_TIME_LEN};

/// Where a slave pushes the payload decoded from `set_data`.
pub trait DisplaySink: Send {
    fn show(&mut self, data: &DisplayData);
}

/// Reference sink rendering the payload as one log line.
pub struct ConsoleDisplay;

impl DisplaySink for ConsoleDisplay {
    fn show(&mut self, data: &DisplayData) {
        info!(
            "displayed: time=[{}] info=[{}] temperature=[{}] brightness=[{}]",
            text_field(&data.time),
            text_field(&data.text),
            text_field(&data.temperature),
            data.brightness,
        );
    }
}

/// The printable prefix of a NUL-terminated field.
pub fn text_field(field: &[u8]) -> Cow<'_, str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
}

/// Copy `src` into `out`, truncating to leave room for the trailing NUL and
/// zero-filling the tail.
fn write_field(src: &[u8], out: &mut [u8]) {
    out.fill(0);
    let len = src.len().min(out.len() - 1);
    out[..len].copy_from_slice(&src[..len]);
}

/// Render `[+/-]TT °C` into the fixed temperature field.
pub fn render_temperature(celsius: i32, out: &mut [u8; DISPLAY_TEMPERATURE_LEN]) {
    let rendered = format!("{celsius:+} °C");
    write_field(rendered.as_bytes(), out);
}

/// Render the local wall clock as `HH:MM:SS` into the fixed time field.
pub fn render_time(out: &mut [u8; DISPLAY_TIME_LEN]) {
    let rendered = Local::now().format("%H:%M:%S").to_string();
    write_field(rendered.as_bytes(), out);
}

/// Render the informational text, NUL-padded to its capacity.
pub fn render_text(text: &str, out: &mut [u8]) {
    write_field(text.as_bytes(), out);
}
