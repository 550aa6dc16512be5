//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | store            | KPI store read/write codes               |
//! | 10-19   | check            | Formula health findings                  |
//! | 20-29   | edit             | Token editor codes                       |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use kpisim_engine::{EngineError, RepoError};

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Store (3-9)
// =============================================================================

/// Store file could not be read or written.
pub const EXIT_STORE_IO: u8 = 3;

/// Store file is not valid KPI JSON.
pub const EXIT_STORE_PARSE: u8 = 4;

/// KPI id not present in the store.
pub const EXIT_STORE_NOT_FOUND: u8 = 5;

/// One or more computed values could not be written back.
pub const EXIT_STORE_PERSIST: u8 = 6;

// =============================================================================
// Check (10-19)
// =============================================================================

/// Circular definitions found.
pub const EXIT_CHECK_CIRCULAR: u8 = 10;

/// Formula errors found (malformed expression, division by zero).
pub const EXIT_CHECK_FORMULA: u8 = 11;

// =============================================================================
// Edit (20-29)
// =============================================================================

/// Token index out of range, or token text is not a single token.
pub const EXIT_EDIT_INVALID: u8 = 20;

/// Formula edit targeted a stored KPI.
pub const EXIT_EDIT_NOT_CALCULATED: u8 = 21;

pub fn repo_exit_code(err: &RepoError) -> u8 {
    match err {
        RepoError::NotFound(_) => EXIT_STORE_NOT_FOUND,
        RepoError::NotCalculated(_) => EXIT_EDIT_NOT_CALCULATED,
        RepoError::Io(_) => EXIT_STORE_IO,
        RepoError::Parse(_) => EXIT_STORE_PARSE,
    }
}

pub fn engine_exit_code(err: &EngineError) -> u8 {
    match err {
        EngineError::Repository(e) => repo_exit_code(e),
        EngineError::UnknownKpi(_) => EXIT_STORE_NOT_FOUND,
        EngineError::NotCalculated(_) => EXIT_EDIT_NOT_CALCULATED,
        EngineError::Edit(_) => EXIT_EDIT_INVALID,
    }
}
