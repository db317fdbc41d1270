//! Tunable limits and layout constants for the guest runtime.
//!
//! Grounded on `§6.5` of the format specification; named the way
//! `fuel-vm`'s `consts.rs` names its own `VM_*` constants, with
//! `static_assertions` checking the invariants that would otherwise only
//! surface as a confusing runtime panic.

/// Largest size, in bytes, a single argument-table entry may reserve.
pub const MAX_SINGLE_ARG: u32 = 0x0040_0000;
/// Largest number of live entries the argument table may hold at once.
pub const MAX_ARG_COUNT: u32 = 0x40;
/// Largest size, in bytes, a single local-variable-table entry may reserve.
pub const MAX_SINGLE_LOCAL_VAR: u32 = 0x0040_0000;
/// Largest number of live entries the local-variable table may hold at once.
pub const MAX_LOCAL_VAR_COUNT: u32 = 0x40;

/// Guest memory is committed a page at a time; must be a power of two.
pub const PAGE_SIZE: usize = 0x1000;
/// `log2(PAGE_SIZE)`, used to round addresses down to a page boundary.
pub const PAGE_SHIFT: u32 = 12;

static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());
static_assertions::const_assert_eq!(1usize << PAGE_SHIFT, PAGE_SIZE);
static_assertions::const_assert!(MAX_ARG_COUNT <= 0x100);
static_assertions::const_assert!(MAX_LOCAL_VAR_COUNT <= 0x100);
