//! Command handlers: bridge CLI args to companion entry points and print
//! the results.

pub mod config_cmd;
pub mod run;
pub mod trigger;
