use std::path::PathBuf;
use std::time::Duration;

use chip8::{
    disassemble, Engine, Headless, Platform, DISPLAY_HEIGHT, DISPLAY_WIDTH,
    EXTENDED_DISPLAY_HEIGHT, EXTENDED_DISPLAY_WIDTH, KEY_COUNT, PROGRAM_START,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

/// CHIP-8 / Super-CHIP runner
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// ROM to load and execute
    rom: PathBuf,

    /// Print the reachable disassembly and exit
    #[clap(long)]
    dis: bool,

    /// Restore a save state after loading the ROM
    #[clap(long)]
    load: Option<PathBuf>,

    /// Write a save state when the run ends
    #[clap(long)]
    save: Option<PathBuf>,

    /// Stop after this many executed cycles
    #[clap(long)]
    cycles: Option<u64>,

    /// Run without printing frames
    #[clap(long)]
    quiet: bool,
}

/// Terminal-backed platform: frames go to stdout, beeps to the log
///
/// Interactive key capture is out of scope for the console runner, so the
/// keyboard always reads as released.
struct Console;

impl Platform for Console {
    fn keyboard(&mut self) -> [bool; KEY_COUNT] {
        [false; KEY_COUNT]
    }

    fn update_display(&mut self, extended: bool, pixels: &[u8]) {
        let (width, height) = if extended {
            (EXTENDED_DISPLAY_WIDTH, EXTENDED_DISPLAY_HEIGHT)
        } else {
            (DISPLAY_WIDTH, DISPLAY_HEIGHT)
        };
        let mut frame = String::with_capacity((width * 2 + 1) * height);
        for y in 0..height {
            for x in 0..width {
                frame.push_str(if pixels[x + y * width] != 0 {
                    "##"
                } else {
                    "  "
                });
            }
            frame.push('\n');
        }
        // clear the terminal and repaint from the top-left
        print!("\x1b[H\x1b[2J{frame}");
    }

    fn beep(&mut self, frequency: f64, duration: Duration) {
        info!("beep at {frequency} Hz for {duration:?}");
    }
}

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("SHRIKE_LOG", "info")
        .write_style_or("SHRIKE_LOG", "always");
    env_logger::init_from_env(env);

    let args = Args::parse();

    let mut engine = Engine::new();
    engine
        .load_program(&args.rom)
        .with_context(|| format!("failed to load {:?}", args.rom))?;

    if args.dis {
        for line in disassemble(PROGRAM_START, &engine.machine().ram) {
            println!("{:03X}: {:04X}  {}", line.addr, line.opcode, line.text);
        }
        return Ok(());
    }

    if let Some(path) = &args.load {
        engine
            .load_state(path)
            .with_context(|| format!("failed to restore state from {path:?}"))?;
    }

    let mut console = Console;
    let mut headless = Headless::default();
    let dev: &mut dyn Platform = if args.quiet {
        &mut headless
    } else {
        &mut console
    };

    let result = run(&mut engine, dev, args.cycles);

    if let Some(path) = &args.save {
        engine
            .save_state(path)
            .with_context(|| format!("failed to write state to {path:?}"))?;
        info!("saved state to {path:?}");
    }

    result
}

fn run(engine: &mut Engine, dev: &mut dyn Platform, limit: Option<u64>) -> Result<()> {
    while !engine.machine().exited {
        engine.tick(dev).context("guest program faulted")?;
        if limit.is_some_and(|n| engine.cycles() >= n) {
            info!("stopping after {} cycles", engine.cycles());
            break;
        }
        // the engine paces itself; just avoid spinning a core flat out
        std::thread::sleep(Duration::from_micros(500));
    }
    if engine.machine().exited {
        info!("guest exited after {} cycles", engine.cycles());
    }
    Ok(())
}
