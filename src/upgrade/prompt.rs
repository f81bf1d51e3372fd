use std::io::{self, BufRead, Stdout, StdinLock, Write};

use crate::error::UpgradeError;

/// Something that can obtain an explicit go-ahead from the operator.
pub trait Confirm {
    /// Blocks until the operator confirms. Fails only if confirmation can no
    /// longer arrive.
    fn confirm(&mut self, message: &str) -> Result<(), UpgradeError>;
}

/// Line-oriented confirmation prompt: prints a message and waits for a line
/// reading `y` (any case, surrounding whitespace ignored). Other lines are
/// ignored.
pub struct OperatorPrompt<R, W> {
    input: R,
    output: W,
}

impl OperatorPrompt<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> OperatorPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for OperatorPrompt<R, W> {
    fn confirm(&mut self, message: &str) -> Result<(), UpgradeError> {
        writeln!(self.output, "{}", message)?;
        self.output.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Err(UpgradeError::OperatorAbort(format!(
                    "input ended before confirmation of: {}",
                    message
                )));
            }
            if line.trim().eq_ignore_ascii_case("y") {
                return Ok(());
            }
        }
    }
}
