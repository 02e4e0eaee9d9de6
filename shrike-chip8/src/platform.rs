//! The boundary between the engine and the host it runs on.

use crate::machine::KEY_COUNT;
use std::time::Duration;

/// Host services the engine calls into
///
/// The engine only ever talks to this trait; concrete hosts (a terminal,
/// a window, a test harness) live outside the core.
pub trait Platform {
    /// Returns which of the 16 logical keys are currently held, indexed by
    /// hex key value
    fn keyboard(&mut self) -> [bool; KEY_COUNT];

    /// Receives a new frame; called only when the display actually changed
    ///
    /// `pixels` is the full row-major buffer; the active region is
    /// 64x32 or 128x64 depending on `extended`.
    fn update_display(&mut self, extended: bool, pixels: &[u8]);

    /// Requests a beep; fire-and-forget
    fn beep(&mut self, frequency: f64, duration: Duration);
}

/// Platform double that records engine output instead of presenting it
///
/// Used by the test suites and the benchmark, and by the CLI when frame
/// output is suppressed.
#[derive(Default)]
pub struct Headless {
    /// Key state handed to the engine on every tick
    pub keys: [bool; KEY_COUNT],

    /// Number of frames the engine has pushed
    pub frames: u64,

    /// Every beep request observed, as `(frequency, duration)`
    pub beeps: Vec<(f64, Duration)>,
}

impl Platform for Headless {
    fn keyboard(&mut self) -> [bool; KEY_COUNT] {
        self.keys
    }

    fn update_display(&mut self, _extended: bool, _pixels: &[u8]) {
        self.frames += 1;
    }

    fn beep(&mut self, frequency: f64, duration: Duration) {
        self.beeps.push((frequency, duration));
    }
}
