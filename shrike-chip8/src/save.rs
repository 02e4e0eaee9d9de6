//! Bit-exact save states.
//!
//! The on-disk layout is the serialized field order below, little-endian,
//! with no compression and no version tag; files are only meaningful
//! across builds that agree on the layout.

use crate::machine::{
    Machine, EXTENDED_DISPLAY_HEIGHT, EXTENDED_DISPLAY_WIDTH, MEMORY_SIZE, REGISTER_COUNT,
    RPL_COUNT, STACK_SIZE,
};
use static_assertions::const_assert_eq;
use std::io::{self, Read, Write};
use zerocopy::{AsBytes, FromBytes, FromZeroes, LittleEndian, U16};

/// Serialized size of a [`Snapshot`], in bytes
pub const SNAPSHOT_SIZE: usize = std::mem::size_of::<Snapshot>();

// every field is align-1, so the layout has no padding to leak
const_assert_eq!(SNAPSHOT_SIZE, 12353);

/// The complete machine state in its serialized layout
#[derive(AsBytes, FromBytes, FromZeroes, Debug)]
#[repr(C)]
pub struct Snapshot {
    v: [u8; REGISTER_COUNT],
    i: U16<LittleEndian>,
    pc: U16<LittleEndian>,
    sp: u8,
    dt: u8,
    st: u8,
    stack: [U16<LittleEndian>; STACK_SIZE],
    ram: [u8; MEMORY_SIZE],
    r: [u8; RPL_COUNT],
    extended: u8,
    pixels: [u8; EXTENDED_DISPLAY_WIDTH * EXTENDED_DISPLAY_HEIGHT],
    exited: u8,
}

impl Snapshot {
    /// Captures the serializable portion of `m`
    pub fn of(m: &Machine) -> Self {
        Self {
            v: m.v,
            i: U16::new(m.i),
            pc: U16::new(m.pc),
            sp: m.sp,
            dt: m.dt,
            st: m.st,
            stack: m.stack.map(U16::new),
            ram: m.ram,
            r: m.r,
            extended: m.display.extended.into(),
            pixels: m.display.pixels,
            exited: m.exited.into(),
        }
    }

    /// Resets `m`, then overwrites every serialized field
    ///
    /// The display is marked dirty so the platform re-renders the restored
    /// frame.
    pub fn apply(&self, m: &mut Machine) {
        m.reset();
        m.v = self.v;
        m.i = self.i.get();
        m.pc = self.pc.get();
        m.sp = self.sp;
        m.dt = self.dt;
        m.st = self.st;
        m.stack = self.stack.map(|w| w.get());
        m.ram = self.ram;
        m.r = self.r;
        m.display.extended = self.extended != 0;
        m.display.pixels = self.pixels;
        m.exited = self.exited != 0;
        m.display_changed = true;
    }

    /// Writes the snapshot to `w` in the fixed layout
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(self.as_bytes())
    }

    /// Reads a snapshot from `r`, failing on a truncated stream
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let mut snapshot = Snapshot::new_zeroed();
        r.read_exact(snapshot.as_bytes_mut())?;
        Ok(snapshot)
    }
}
