//! Human-facing startup output.
//!
//! Request-path logging goes through `tracing` everywhere else in the
//! crate; this `Logger` (trimmed from the teacher's CLI logger) is only
//! for the banner `main` prints on startup, which an operator reads once
//! and a structured log line would just get in the way of.

#[derive(Debug, Clone)]
pub struct Logger {
    quiet: bool,
}

impl Logger {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n=== {} ===", title);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("ℹ️  {}", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("✅ {}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("⚠️  WARNING: {}", message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("❌ ERROR: {}", message);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(false)
    }
}
