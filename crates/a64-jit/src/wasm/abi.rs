/// Module name for every import of a generated function module.
pub const IMPORT_MODULE: &str = "env";

/// Imported linear memory holding guest RAM at address 0 and the `CpuState` at `cpu_ptr`.
pub const IMPORT_MEMORY: &str = "memory";

/// Maximum number of 64KiB pages in a wasm32 linear memory (4GiB).
pub const WASM32_MAX_PAGES: u32 = 65_536;

/// Size of one linear-memory page.
pub const WASM_PAGE_BYTES: u64 = 65_536;

/// Default export name of the generated function.
///
/// Signature: `run(cpu_ptr: i32) -> i64`, returning the guest address the function returned to.
pub const EXPORT_RUN: &str = "run";

/// Call the function installed in a table slot.
///
/// Signature: `env.call_slot(slot: i32, cpu_ptr: i32) -> i64`, returning the guest address the
/// callee returned to.
pub const IMPORT_CALL_SLOT: &str = "call_slot";

/// Run the function at a computed guest address.
///
/// Signature: `env.jump_to_pc(cpu_ptr: i32, target: i64) -> i64`.
pub const IMPORT_JUMP_TO_PC: &str = "jump_to_pc";

/// Charge one loop back edge against the host's budget. The host traps to stop the guest.
///
/// Signature: `env.tick(cpu_ptr: i32)`.
pub const IMPORT_TICK: &str = "tick";
