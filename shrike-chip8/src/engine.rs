//! The execution engine: fetch-decode-execute pacing, timers and lifecycle.

use crate::machine::{Machine, Opcode, INSTRUCTION_SIZE, MEMORY_SIZE, PROGRAM_START};
use crate::platform::Platform;
use crate::save::Snapshot;
use crate::{decode, Fault};
use log::{debug, info};
use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

/// Guest instruction rate, in cycles per second
pub const CYCLE_HZ: u64 = 600;

/// Timer decrement rate, in ticks per second
pub const TIMER_HZ: u64 = 60;

/// Time between guest cycles, rounded to whole milliseconds
pub const CYCLE_PERIOD: Duration = Duration::from_millis((1000 + CYCLE_HZ / 2) / CYCLE_HZ);

/// Time between timer decrements, rounded to whole milliseconds
pub const TIMER_PERIOD: Duration = Duration::from_millis((1000 + TIMER_HZ / 2) / TIMER_HZ);

/// Frequency of the beep requested when the sound timer expires
pub const BEEP_FREQUENCY: f64 = 550.0;

/// Duration of the beep requested when the sound timer expires
pub const BEEP_DURATION: Duration = Duration::from_millis(50);

/// Drives a [`Machine`] at the configured cycle and timer rates
///
/// The engine is a single-owner value: every mutation of the machine flows
/// through `&mut Engine`, so a save or restore can never interleave with a
/// cycle.  Callers that share the engine across threads wrap it in a mutex.
pub struct Engine {
    machine: Machine,
    last_cycle: Instant,
    last_timer: Instant,
    paused: bool,
    cycles: u64,
    breakpoints: BTreeSet<u16>,
}

impl Engine {
    /// Builds an engine around a freshly-reset machine
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            machine: Machine::new(),
            last_cycle: now,
            last_timer: now,
            paused: false,
            cycles: 0,
            breakpoints: BTreeSet::new(),
        }
    }

    /// Read-only view of the machine, for renderers and debuggers
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Mutable access to the machine
    ///
    /// The engine stays the single owner; this is for embedders that poke
    /// state while the engine is not mid-tick.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Whether the engine is paused
    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Pauses or resumes execution; a no-op in effect once the machine has
    /// exited
    pub fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Number of cycles executed since the last program load
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Requests a pause when execution reaches `addr`
    pub fn add_breakpoint(&mut self, addr: u16) {
        self.breakpoints.insert(addr);
    }

    /// Removes a breakpoint; a no-op if none is set at `addr`
    pub fn remove_breakpoint(&mut self, addr: u16) {
        self.breakpoints.remove(&addr);
    }

    /// The currently set breakpoints
    pub fn breakpoints(&self) -> &BTreeSet<u16> {
        &self.breakpoints
    }

    /// Advances the engine by one call of the driving loop
    ///
    /// Samples the keyboard, then executes at most one cycle if the cycle
    /// period elapsed and the engine is running, and independently
    /// decrements the timers if the timer period elapsed.  The caller's
    /// loop frequency does not set the pace; the two internal clocks do.
    pub fn tick(&mut self, dev: &mut dyn Platform) -> Result<(), Fault> {
        if self.machine.exited {
            return Ok(());
        }

        self.machine.keys = dev.keyboard();

        let now = Instant::now();

        if now.duration_since(self.last_cycle) >= CYCLE_PERIOD && !self.paused {
            if self.breakpoints.contains(&self.machine.pc) {
                info!("breakpoint hit at {:03X}", self.machine.pc);
                self.paused = true;
            } else {
                self.cycle(dev)?;
            }
            self.last_cycle = now;
        }

        if now.duration_since(self.last_timer) >= TIMER_PERIOD {
            self.timer_tick(dev);
            self.last_timer = now;
        }

        Ok(())
    }

    /// Executes exactly one cycle, regardless of the pause state
    ///
    /// Intended for single-stepping while paused; a no-op once the machine
    /// has exited.
    pub fn step(&mut self, dev: &mut dyn Platform) -> Result<(), Fault> {
        if self.machine.exited {
            return Ok(());
        }
        self.machine.keys = dev.keyboard();
        self.cycle(dev)
    }

    /// One fetch-decode-execute step, plus the display push if anything
    /// drew
    fn cycle(&mut self, dev: &mut dyn Platform) -> Result<(), Fault> {
        let m = &mut self.machine;
        let addr = m.pc;
        let opcode = m.read_word(addr);

        m.ir = Opcode(opcode);
        m.pc = addr.wrapping_add(INSTRUCTION_SIZE);

        let inst = decode(opcode).ok_or(Fault::UnknownOpcode { addr, opcode })?;
        inst.run(m)?;
        self.cycles += 1;

        if m.display_changed {
            dev.update_display(m.display.extended, &m.display.pixels);
            m.display_changed = false;
        }
        Ok(())
    }

    /// Decrements both timers, requesting a beep when the sound timer
    /// reaches zero
    fn timer_tick(&mut self, dev: &mut dyn Platform) {
        let m = &mut self.machine;
        if m.dt > 0 {
            m.dt -= 1;
        }
        if m.st > 0 {
            m.st -= 1;
            if m.st == 0 {
                debug!("sound timer expired");
                dev.beep(BEEP_FREQUENCY, BEEP_DURATION);
            }
        }
    }

    /// Loads a program image from disk and resets the machine around it
    pub fn load_program<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let image = std::fs::read(path)?;
        self.load_image(&image)
    }

    /// Resets the machine and copies `image` into memory at the program
    /// start address
    ///
    /// Fails without mutating any state if the image does not fit.
    pub fn load_image(&mut self, image: &[u8]) -> io::Result<()> {
        let start = usize::from(PROGRAM_START);
        if image.len() > MEMORY_SIZE - start {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "program image is {} bytes, at most {} fit",
                    image.len(),
                    MEMORY_SIZE - start
                ),
            ));
        }

        self.machine.reset();
        self.machine.ram[start..start + image.len()].copy_from_slice(image);
        self.machine.pc = PROGRAM_START;
        self.cycles = 0;
        info!("loaded {} byte program image", image.len());
        Ok(())
    }

    /// Writes the machine state to `path` in the fixed binary layout
    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        Snapshot::of(&self.machine).write(&mut file)
    }

    /// Restores the machine state from `path`
    ///
    /// The file is parsed before any state is touched; a load either
    /// replaces the whole machine or leaves it untouched.
    pub fn load_state<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let mut file = File::open(path)?;
        let snapshot = Snapshot::read(&mut file)?;
        snapshot.apply(&mut self.machine);
        info!("restored state, pc at {:03X}", self.machine.pc);
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Headless;

    fn engine_with(image: &[u8]) -> Engine {
        let mut engine = Engine::new();
        engine.load_image(image).unwrap();
        engine
    }

    /// Back-dates the internal clocks so the next `tick` is due
    fn make_due(engine: &mut Engine, cycle: bool, timer: bool) {
        let now = Instant::now();
        if cycle {
            engine.last_cycle = now - CYCLE_PERIOD;
        }
        if timer {
            engine.last_timer = now - TIMER_PERIOD;
        }
    }

    #[test]
    fn load_image_resets_and_positions_pc() {
        let mut engine = Engine::new();
        engine.machine.v[0] = 7;
        engine.load_image(&[0x60, 0x42]).unwrap();
        assert_eq!(engine.machine.pc, PROGRAM_START);
        assert_eq!(engine.machine.v[0], 0);
        assert_eq!(engine.machine.ram[0x200..0x202], [0x60, 0x42]);
    }

    #[test]
    fn oversized_image_is_rejected_without_mutation() {
        let mut engine = engine_with(&[0x60, 0x07]);
        let mut dev = Headless::default();
        engine.step(&mut dev).unwrap();
        assert_eq!(engine.machine.v[0], 0x07);

        let huge = vec![0; MEMORY_SIZE];
        let err = engine.load_image(&huge).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // the earlier program is still in place
        assert_eq!(engine.machine.v[0], 0x07);
        assert_eq!(engine.machine.ram[0x200..0x202], [0x60, 0x07]);
    }

    #[test]
    fn step_executes_one_instruction() {
        let mut engine = engine_with(&[0x60, 0x42, 0x61, 0x43]);
        let mut dev = Headless::default();

        engine.step(&mut dev).unwrap();
        assert_eq!(engine.machine.v[0], 0x42);
        assert_eq!(engine.machine.pc, 0x202);
        assert_eq!(engine.cycles(), 1);

        engine.pause(true);
        engine.step(&mut dev).unwrap();
        assert_eq!(engine.machine.v[1], 0x43);
        assert_eq!(engine.cycles(), 2);
    }

    #[test]
    fn tick_respects_the_cycle_clock() {
        let mut engine = engine_with(&[0x60, 0x42]);
        let mut dev = Headless::default();

        // not due yet: nothing runs
        engine.last_cycle = Instant::now();
        engine.tick(&mut dev).unwrap();
        assert_eq!(engine.cycles(), 0);

        make_due(&mut engine, true, false);
        engine.tick(&mut dev).unwrap();
        assert_eq!(engine.cycles(), 1);
        assert_eq!(engine.machine.v[0], 0x42);
    }

    #[test]
    fn pause_stops_cycles_but_not_timers() {
        let mut engine = engine_with(&[0x60, 0x42]);
        let mut dev = Headless::default();
        engine.machine.dt = 3;
        engine.pause(true);

        make_due(&mut engine, true, true);
        engine.tick(&mut dev).unwrap();
        assert_eq!(engine.cycles(), 0);
        assert_eq!(engine.machine.dt, 2);
    }

    #[test]
    fn timers_floor_at_zero_and_beep_once() {
        let mut engine = engine_with(&[0x60, 0x42]);
        let mut dev = Headless::default();
        engine.pause(true);
        engine.machine.st = 2;

        for _ in 0..5 {
            make_due(&mut engine, false, true);
            engine.tick(&mut dev).unwrap();
        }
        assert_eq!(engine.machine.st, 0);
        assert_eq!(engine.machine.dt, 0);
        assert_eq!(dev.beeps.len(), 1);
        assert_eq!(dev.beeps[0], (BEEP_FREQUENCY, BEEP_DURATION));
    }

    #[test]
    fn wait_for_key_busy_waits() {
        let mut engine = engine_with(&[0xF0, 0x0A]);
        let mut dev = Headless::default();

        for _ in 0..3 {
            engine.step(&mut dev).unwrap();
            assert_eq!(engine.machine.pc, 0x200);
        }

        dev.keys[0xB] = true;
        engine.step(&mut dev).unwrap();
        assert_eq!(engine.machine.pc, 0x202);
        assert_eq!(engine.machine.v[0], 0xB);
    }

    #[test]
    fn decode_fault_carries_the_faulting_word() {
        let mut engine = engine_with(&[0xFF, 0xFF]);
        let mut dev = Headless::default();
        assert_eq!(
            engine.step(&mut dev),
            Err(Fault::UnknownOpcode {
                addr: 0x200,
                opcode: 0xFFFF
            })
        );
    }

    #[test]
    fn exit_freezes_the_engine() {
        let mut engine = engine_with(&[0x00, 0xFD, 0x60, 0x42]);
        let mut dev = Headless::default();
        engine.step(&mut dev).unwrap();
        assert!(engine.machine.exited);

        make_due(&mut engine, true, true);
        engine.tick(&mut dev).unwrap();
        engine.step(&mut dev).unwrap();
        assert_eq!(engine.cycles(), 1);
        assert_eq!(engine.machine.v[0], 0);
    }

    #[test]
    fn breakpoint_pauses_before_the_cycle() {
        let mut engine = engine_with(&[0x60, 0x42, 0x61, 0x43]);
        let mut dev = Headless::default();
        engine.add_breakpoint(0x200);

        make_due(&mut engine, true, false);
        engine.tick(&mut dev).unwrap();
        assert!(engine.paused());
        assert_eq!(engine.cycles(), 0);
        assert_eq!(engine.machine.pc, 0x200);

        // stepping ignores the breakpoint, then resuming proceeds
        engine.step(&mut dev).unwrap();
        assert_eq!(engine.machine.pc, 0x202);
        engine.pause(false);
        make_due(&mut engine, true, false);
        engine.tick(&mut dev).unwrap();
        assert_eq!(engine.machine.v[1], 0x43);
    }

    #[test]
    fn display_pushed_only_when_dirty() {
        let mut engine = engine_with(&[0x60, 0x42, 0x61, 0x43]);
        let mut dev = Headless::default();

        // the reset marks the display dirty, so the first cycle pushes
        engine.step(&mut dev).unwrap();
        assert_eq!(dev.frames, 1);
        assert!(!engine.machine.display_changed);

        // a non-drawing instruction does not push
        engine.step(&mut dev).unwrap();
        assert_eq!(dev.frames, 1);
    }

    #[test]
    fn save_and_load_state_roundtrip() {
        let mut engine = engine_with(&[0x60, 0x42, 0xA3, 0x00]);
        let mut dev = Headless::default();
        engine.step(&mut dev).unwrap();
        engine.step(&mut dev).unwrap();
        engine.machine.display.pixels[17] = 1;
        engine.machine.display.extended = true;

        let path = std::env::temp_dir().join(format!("shrike-state-{}", std::process::id()));
        engine.save_state(&path).unwrap();

        let v = engine.machine.v;
        let ram = engine.machine.ram;
        let pixels = engine.machine.display.pixels;

        let mut other = Engine::new();
        other.load_state(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(other.machine.v, v);
        assert_eq!(other.machine.pc, 0x204);
        assert_eq!(other.machine.i, 0x300);
        assert_eq!(other.machine.ram, ram);
        assert_eq!(other.machine.display.pixels, pixels);
        assert!(other.machine.display.extended);
        assert!(other.machine.display_changed);
    }

    #[test]
    fn load_state_from_missing_file_is_an_io_error() {
        let mut engine = Engine::new();
        let err = engine
            .load_state("/nonexistent/shrike-state")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
