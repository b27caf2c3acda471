//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Scripts rely on them, so treat changes as breaking.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                                |
//! |---------|------------------|--------------------------------------------|
//! | 0       | Universal        | Success                                    |
//! | 1       | Universal        | General error (unspecified)                |
//! | 2       | Universal        | CLI usage error (bad args, missing file)   |
//! | 3-9     | api              | Error codes carried by the response        |
//! | 10-19   | config           | Settings file problems                     |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `api_exit_code` or the relevant command

use calcgraph_protocol::ErrorCode;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable input file, empty stdin.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// API (3-9)
// =============================================================================

/// Research payload, assumption value, expression or checkpoint was rejected.
pub const EXIT_VALIDATION: u8 = 3;

/// Unknown assumption, formula or custom formula.
pub const EXIT_NOT_FOUND: u8 = 4;

/// Operation conflicts with stored state (e.g. activating a missing version).
pub const EXIT_CONFLICT: u8 = 5;

/// Internal failure: corrupt checkpoint, storage error.
pub const EXIT_INTERNAL: u8 = 6;

// =============================================================================
// Config (10-19)
// =============================================================================

/// Settings file could not be read, parsed or failed validation.
pub const EXIT_CONFIG: u8 = 10;

/// Map an API error code to its exit code.
pub fn api_exit_code(code: ErrorCode) -> u8 {
    match code {
        ErrorCode::ValidationError => EXIT_VALIDATION,
        ErrorCode::NotFound => EXIT_NOT_FOUND,
        ErrorCode::Conflict => EXIT_CONFLICT,
        ErrorCode::Internal => EXIT_INTERNAL,
    }
}
