#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use a64_cpu::{CpuState, GuestMemory, Width};
use a64_jit::backend::WasmFunction;
use a64_jit::ir::SlotId;
use a64_jit::table::SlotEntry;
use a64_jit::wasm::WasmOptions;
use a64_jit::{disassemble, Backend, Emulator, InterpBackend, JitConfig, WasmBackend};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Disassemble and run raw AArch64 code through the function JIT")]
struct Args {
    /// Log every decoded instruction (same as `RUST_LOG=trace`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the assembler text of each instruction word.
    Disasm {
        /// Instruction words in hex (`d65f03c0` or `0xd65f03c0`).
        #[arg(conflicts_with = "image")]
        words: Vec<String>,

        /// Disassemble a raw little-endian image instead.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Address of the first word, used for the listing.
        #[arg(long, default_value = "0", value_parser = parse_u64)]
        base: u64,
    },

    /// Load a raw image and run the function at `--entry` until it returns.
    Run {
        /// Raw little-endian code image.
        image: PathBuf,

        /// Guest address the image is copied to.
        #[arg(long, default_value = "0x1000", value_parser = parse_u64)]
        load_addr: u64,

        /// Guest address to start at; defaults to `--load-addr`.
        #[arg(long, value_parser = parse_u64)]
        entry: Option<u64>,

        /// Guest RAM size in KiB.
        #[arg(long, default_value_t = 1024)]
        ram_kib: u64,

        /// Initial register values, e.g. `--set x0=5 --set sp=0x8000`.
        #[arg(long = "set", value_name = "REG=VALUE")]
        set: Vec<String>,

        /// Stop after this many loop back edges.
        #[arg(long)]
        loop_budget: Option<u64>,

        /// Also encode every compiled function as a wasm module into this directory.
        #[arg(long)]
        emit_wasm: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = if args.verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Disasm { words, image, base } => disasm(words, image.as_deref(), base),
        Command::Run {
            image,
            load_addr,
            entry,
            ram_kib,
            set,
            loop_budget,
            emit_wasm,
        } => {
            let ram_bytes = ram_kib.checked_mul(1024).context("RAM size overflow")?;
            let ram_bytes = usize::try_from(ram_bytes).context("RAM size overflow")?;
            let code =
                fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
            let mut mem = GuestMemory::new(ram_bytes);
            mem.load_image(load_addr, &code)
                .with_context(|| format!("image does not fit at {load_addr:#x}"))?;

            let config = JitConfig {
                loop_budget,
                ..JitConfig::default()
            };
            let entry = entry.unwrap_or(load_addr);
            match emit_wasm {
                Some(dir) => {
                    let options = WasmOptions {
                        guest_ram_bytes: Some(ram_bytes as u64),
                        ..WasmOptions::default()
                    };
                    let emu = run(mem, WasmBackend::new(options), config, entry, &set)?;
                    write_modules(&emu, &dir)
                }
                None => run(mem, InterpBackend, config, entry, &set).map(drop),
            }
        }
    }
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|err| format!("invalid number {s:?}: {err}"))
}

fn disasm(words: Vec<String>, image: Option<&Path>, base: u64) -> Result<()> {
    let words = match image {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            if bytes.len() % 4 != 0 {
                bail!("{} is not a whole number of words", path.display());
            }
            bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect()
        }
        None => words
            .iter()
            .map(|word| {
                let hex = word.trim_start_matches("0x");
                u32::from_str_radix(hex, 16).with_context(|| format!("invalid word {word:?}"))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    for (i, word) in words.into_iter().enumerate() {
        let addr = base.wrapping_add(4 * i as u64);
        println!("{addr:#010x}: {word:08x}  {}", disassemble(word));
    }
    Ok(())
}

fn apply_assignment(cpu: &mut CpuState, assignment: &str) -> Result<()> {
    let (reg, value) = assignment
        .split_once('=')
        .with_context(|| format!("expected REG=VALUE, got {assignment:?}"))?;
    let value = parse_u64(value).map_err(anyhow::Error::msg)?;
    match reg {
        "sp" => cpu.set_sp(value),
        "lr" => cpu.set_x(30, Width::W64, value),
        _ => {
            let n: u8 = reg
                .strip_prefix('x')
                .and_then(|n| n.parse().ok())
                .filter(|&n| n < 31)
                .with_context(|| format!("unknown register {reg:?}"))?;
            cpu.set_x(n, Width::W64, value);
        }
    }
    Ok(())
}

fn run<B: Backend>(
    mem: GuestMemory,
    backend: B,
    config: JitConfig,
    entry: u64,
    assignments: &[String],
) -> Result<Emulator<B>> {
    let mut emu = Emulator::new(mem, backend, config);
    for assignment in assignments {
        apply_assignment(emu.cpu_mut(), assignment)?;
    }

    let returned_to = emu
        .execute(entry)
        .with_context(|| format!("guest function at {entry:#x} failed"))?;
    let stats = emu.compiler().stats();
    info!(
        compilations = stats.compilations,
        blocks = stats.blocks_discovered,
        cache_hits = stats.cache_hits,
        "run finished"
    );

    println!("returned to {returned_to:#x}");
    print_state(emu.cpu());
    Ok(emu)
}

fn print_state(cpu: &CpuState) {
    for row in (0..31u8).collect::<Vec<_>>().chunks(4) {
        let line: Vec<String> = row
            .iter()
            .map(|&n| format!("x{n:<2} {:016x}", cpu.x(n, Width::W64)))
            .collect();
        println!("{}", line.join("  "));
    }
    let nzcv = cpu.nzcv();
    let flag = |set: bool, c: char| if set { c } else { '-' };
    println!(
        "sp  {:016x}  el {}  nzcv {}{}{}{}  daif {:#x}",
        cpu.sp(),
        cpu.el(),
        flag(nzcv.n, 'N'),
        flag(nzcv.z, 'Z'),
        flag(nzcv.c, 'C'),
        flag(nzcv.v, 'V'),
        cpu.daif(),
    );
}

fn write_modules(emu: &Emulator<WasmBackend>, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let compiler = emu.compiler();
    for slot in 0..compiler.table_capacity() as u32 {
        let Some(SlotEntry::Compiled { function, .. }) = compiler.slot(SlotId(slot)) else {
            continue;
        };
        let function: &WasmFunction = function;
        let path = dir.join(format!("fn_{:x}.wasm", function.entry()));
        fs::write(&path, function.module())
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), bytes = function.module().len(), "wrote module");
    }
    Ok(())
}
