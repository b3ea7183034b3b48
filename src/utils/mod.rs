//! Utility functions.
//!
//! Collection of helper functions used across the host and modules.

pub mod parser;

pub use parser::{
    CommandLine, apply_fillings, format_duration, parse_command, parse_duration,
    replace_ignore_case,
};
