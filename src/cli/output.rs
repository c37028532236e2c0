//! Output formatting for CLI commands
//!
//! Results go to stdout; verbose diagnostics go to stderr so that
//! `--format json` output stays machine-readable.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub struct Output {
    format: OutputFormat,
    verbose: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// Prints a completion message
    pub fn success(&self, message: &str) {
        println!("{}", self.render_success(message));
    }

    fn render_success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Text => message.to_string(),
            OutputFormat::Json => serde_json::json!({
                "success": true,
                "message": message
            })
            .to_string(),
        }
    }

    /// Prints structured data (pretty in text mode, one line in JSON mode)
    pub fn data<T: Serialize>(&self, data: &T) {
        let rendered = match self.format {
            OutputFormat::Text => serde_json::to_string_pretty(data),
            OutputFormat::Json => serde_json::to_string(data),
        };
        if let Ok(json) = rendered {
            println!("{}", json);
        }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Prints a debug message (only when --verbose is set)
    pub fn verbose(&self, message: &str) {
        if self.verbose {
            eprintln!("[verbose] {}", message);
        }
    }

    /// Prints a debug message tagged with a context (only when --verbose is set)
    pub fn verbose_ctx(&self, context: &str, message: &str) {
        if self.verbose {
            eprintln!("[verbose:{}] {}", context, message);
        }
    }
}
