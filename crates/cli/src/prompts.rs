use std::io::{self, IsTerminal, Write};

use stevedore_lib::converge::Prompt;

/// Asks on the controlling terminal.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
  fn confirm(&self, message: &str) -> io::Result<bool> {
    confirm(message)
  }
}

pub fn confirm(message: &str) -> io::Result<bool> {
  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    return Err(io::Error::other(
      "Cannot prompt for confirmation in non-interactive mode. Run without --interactive to proceed.",
    ));
  }

  write!(io::stderr(), "{} [y/N] ", message)?;
  io::stderr().flush()?;

  let mut input = String::new();
  io::stdin().read_line(&mut input)?;

  Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
