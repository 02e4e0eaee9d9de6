//! CHIP-8 / Super-CHIP virtual machine
//!
//! The crate is split along the machine's own seams: [`Machine`] is the
//! complete mutable state, [`TABLE`] the immutable instruction set,
//! [`Engine`] the dual-rate driver that owns a machine and talks to a
//! [`Platform`], [`disassemble`] a pure control-flow explorer over a
//! memory image, and [`Snapshot`] the fixed-layout save state.
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::fmt;

mod dis;
mod engine;
mod inst;
mod machine;
mod platform;
mod save;

pub use dis::{disassemble, Line};
pub use engine::{
    Engine, BEEP_DURATION, BEEP_FREQUENCY, CYCLE_HZ, CYCLE_PERIOD, TIMER_HZ, TIMER_PERIOD,
};
pub use inst::{decode, Instruction, Kind, TABLE};
pub use machine::{
    Display, Machine, Opcode, BIG_FONT_ADDR, BIG_FONT_GLYPH_SIZE, DISPLAY_HEIGHT, DISPLAY_WIDTH,
    EXTENDED_DISPLAY_HEIGHT, EXTENDED_DISPLAY_WIDTH, FONT_ADDR, FONT_GLYPH_COUNT, FONT_GLYPH_SIZE,
    INSTRUCTION_SIZE, KEY_COUNT, MEMORY_SIZE, PROGRAM_START, REGISTER_COUNT, RPL_COUNT, STACK_SIZE,
};
pub use platform::{Headless, Platform};
pub use save::{Snapshot, SNAPSHOT_SIZE};

/// Faults raised while executing guest instructions
///
/// All of these indicate a malformed or incompatible guest program; none
/// are recovered automatically, and they propagate out of the
/// [`Engine::tick`]/[`Engine::step`] call that triggered them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// No instruction table entry matches the fetched word
    ///
    /// Guest programs can legitimately keep data in executable-looking
    /// regions, so this is reported rather than treated as a crash.
    UnknownOpcode {
        /// Address the word was fetched from
        addr: u16,
        /// The raw instruction word
        opcode: u16,
    },

    /// `CALL` with all 16 stack slots in use
    StackOverflow {
        /// Address of the faulting instruction
        pc: u16,
    },

    /// `RET` with an empty stack
    StackUnderflow {
        /// Address of the faulting instruction
        pc: u16,
    },

    /// Glyph lookup for a digit outside the 16-entry font
    DigitOutOfRange {
        /// The out-of-range digit
        digit: u8,
    },

    /// RPL flag transfer touching more than the 8 flag registers
    FlagsOutOfRange {
        /// The out-of-range register count field
        x: u8,
    },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Fault::UnknownOpcode { addr, opcode } => {
                write!(f, "unknown opcode {opcode:04X} at {addr:03X}")
            }
            Fault::StackOverflow { pc } => write!(f, "stack overflow at {pc:03X}"),
            Fault::StackUnderflow { pc } => write!(f, "stack underflow at {pc:03X}"),
            Fault::DigitOutOfRange { digit } => {
                write!(f, "glyph lookup for out-of-range digit {digit}")
            }
            Fault::FlagsOutOfRange { x } => {
                write!(f, "flag register transfer with out-of-range count {x}")
            }
        }
    }
}

impl std::error::Error for Fault {}
