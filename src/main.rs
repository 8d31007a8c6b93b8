//! Z80 Emulator - CLI Entry Point
//!
//! Commands:
//! - `z80-emu run <program>` - Run a raw image or ASM file under a cycle budget
//! - `z80-emu debug <program>` - Interactive debugger
//! - `z80-emu asm <source>` - Assemble to a raw image
//! - `z80-emu disasm <image>` - Disassemble a raw image

use clap::{Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use z80::cpu::execute::Step;
use z80::cpu::memory::read_image;
use z80::{assemble, disassemble, Cpu, Registers};

#[derive(Parser)]
#[command(name = "z80-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "An interpreter for a subset of the Zilog Z80 instruction set")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts or the cycle budget runs out
    Run {
        /// Path to the raw image or ASM file to execute
        program: String,
        /// Cycle budget
        #[arg(short, long, default_value = "1024")]
        max_cycles: u64,
        /// Print every executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the raw image or ASM file to debug
        program: String,
    },
    /// Assemble source to a raw image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a raw image to readable text
    Disasm {
        /// Path to the image file
        image: String,
        /// Address the image is loaded at
        #[arg(long, default_value = "0", value_parser = parse_address)]
        origin: u16,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, json }) => {
            run_program(&program, max_cycles, trace, json);
        }
        Some(Commands::Debug { program }) => {
            debug_program(&program);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image, origin }) => {
            disassemble_file(&image, origin);
        }
        None => {
            println!("Z80 Emulator v0.1.0");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn parse_address(text: &str) -> Result<u16, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix('$')) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", text, e))
}

fn fail(message: String) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

/// Load a program image, assembling it first when the path ends in `.asm`.
fn load_program(path: &str) -> Vec<u8> {
    if path.ends_with(".asm") {
        let source = std::fs::read_to_string(path)
            .unwrap_or_else(|e| fail(format!("Failed to read file: {}", e)));
        let image = assemble(&source)
            .unwrap_or_else(|e| fail(format!("Assembly error: {}", e)));
        log::info!("assembled {} bytes from {}", image.len(), path);
        image
    } else {
        let file = std::fs::File::open(path)
            .unwrap_or_else(|e| fail(format!("Failed to open image: {}", e)));
        let image = read_image(file)
            .unwrap_or_else(|e| fail(format!("Failed to load image: {}", e)));
        log::info!("loaded {} bytes from {}", image.len(), path);
        image
    }
}

fn run_program(path: &str, max_cycles: u64, trace: bool, json: bool) {
    let image = load_program(path);

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_program(&image) {
        fail(format!("Failed to load program: {}", e));
    }

    let report = if trace {
        cpu.run_traced(max_cycles, &mut |step: &Step, regs: &Registers| {
            println!(
                "{:04X}: {:<20} A={:02X} F={} PC={:04X} SP={:04X}",
                step.address,
                z80::asm::disassemble_instruction(&step.instruction),
                regs.a,
                regs.flags_string(),
                regs.pc,
                regs.sp
            );
        })
    } else {
        cpu.run(max_cycles)
    };

    if json {
        let state = serde_json::json!({
            "report": report,
            "registers": cpu.regs,
        });
        match serde_json::to_string_pretty(&state) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(format!("Failed to encode state: {}", e)),
        }
        return;
    }

    println!("Ran {} cycles ({} instructions)", report.cycles, report.instructions);
    println!("Stop: {:?}", report.stop);
    if report.unknown_opcodes > 0 {
        println!("Unknown opcodes skipped: {}", report.unknown_opcodes);
    }
    println!();
    println!("{}", cpu.regs);
}

#[cfg(feature = "tui")]
fn debug_program(path: &str) {
    let image = load_program(path);

    if let Err(e) = z80::run_debugger(image) {
        fail(format!("Debugger error: {}", e));
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str) {
    fail("The debugger requires the 'tui' feature".to_string());
}

fn assemble_file(source_path: &str, output: Option<String>) {
    let out_path = output.unwrap_or_else(|| {
        match source_path.strip_suffix(".asm") {
            Some(stem) => format!("{}.bin", stem),
            None => format!("{}.bin", source_path),
        }
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = std::fs::read_to_string(source_path)
        .unwrap_or_else(|e| fail(format!("Failed to read file: {}", e)));
    let image = assemble(&source)
        .unwrap_or_else(|e| fail(format!("Assembly error: {}", e)));

    if let Err(e) = std::fs::write(&out_path, &image) {
        fail(format!("Failed to write image: {}", e));
    }

    println!("✓ Wrote {} bytes to {}", image.len(), out_path);
}

fn disassemble_file(image_path: &str, origin: u16) {
    let file = std::fs::File::open(image_path)
        .unwrap_or_else(|e| fail(format!("Failed to open image: {}", e)));
    let image = read_image(file)
        .unwrap_or_else(|e| fail(format!("Failed to load image: {}", e)));

    print!("{}", disassemble(&image, origin));
}
