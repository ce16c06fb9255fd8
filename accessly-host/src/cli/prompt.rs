//! Line prompts for the console

use anyhow::Result;
use std::io::{BufRead, Write};

/// Prompting over any line source, stdin/stdout in the real console.
pub struct Prompter<R, W> {
    input: R,
    pub output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Next trimmed line after `prompt`, `None` at end of input.
    pub fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;

        let mut input = String::new();
        if self.input.read_line(&mut input)? == 0 {
            return Ok(None);
        }
        Ok(Some(input.trim().to_string()))
    }

    pub fn prompt_optional(&mut self, prompt: &str) -> Result<Option<String>> {
        let input = self.read_line(&format!("{}: ", prompt))?;
        Ok(input.filter(|s| !s.is_empty()))
    }

    pub fn prompt_with_default(&mut self, prompt: &str, default: &str) -> Result<String> {
        Ok(self
            .prompt_optional(&format!("{} ({})", prompt, default))?
            .unwrap_or_else(|| default.to_string()))
    }
}
