//! CLI Exit Code Registry
//!
//! Single source of truth for the `dosegrid` exit codes. Scripts branch on
//! these, so a code never changes meaning once released.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success                                                   |
//! | 2    | Usage error (bad arguments, unknown sheet, malformed gate)|
//! | 3    | Input file could not be read                              |
//! | 4    | Input file could not be parsed as a spreadsheet           |
//! | 5    | Detection config could not be loaded or is invalid        |
//! | 6    | No dataset candidate found (only with `--fail-empty`)     |

// =============================================================================
// Universal
// =============================================================================

/// Command completed; candidates (if any) were printed.
pub const EXIT_SUCCESS: u8 = 0;

/// Bad arguments, an unknown sheet name, or a malformed `--gate`.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Input
// =============================================================================

/// File missing or unreadable.
pub const EXIT_IO: u8 = 3;

/// CSV or workbook content could not be decoded.
pub const EXIT_PARSE: u8 = 4;

/// `--config` TOML failed to parse or validate.
pub const EXIT_CONFIG: u8 = 5;

// =============================================================================
// Detection
// =============================================================================

/// Analysis ran but kept no candidate and `--fail-empty` was given.
pub const EXIT_NO_CANDIDATES: u8 = 6;
