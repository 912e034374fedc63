//! Result printing.

use std::fmt::Display;

use serde_json::Value;

use crate::cli::OutputFormat;

#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: OutputFormat,
}

impl Printer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print one result: `plain` as a line, or `json` as a document.
    pub fn emit(&self, plain: impl Display, json: &Value) {
        match self.format {
            OutputFormat::Plain => println!("{plain}"),
            OutputFormat::Json => println!("{json}"),
        }
    }
}
