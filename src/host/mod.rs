//! Host harness - the console front end that drives the modules.

mod console;

pub use console::Console;
