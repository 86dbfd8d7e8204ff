//! Terminal implementations of the core's notification and prompt seams.

use std::io::{IsTerminal, Write};

use async_trait::async_trait;
use owo_colors::OwoColorize;

use canopy_core::{ConfirmPrompt, Notifier};

/// Prints success messages to stderr.
///
/// Error notifications go to the debug log only: every failing operation
/// also returns its error, which `main` renders as a diagnostic.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleNotifier {
    pub quiet: bool,
    pub color: bool,
}

impl Notifier for ConsoleNotifier {
    fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let mark = if self.color {
            "✓".green().to_string()
        } else {
            "✓".to_owned()
        };
        let _ = writeln!(std::io::stderr().lock(), "{mark} {message}");
    }

    fn error(&self, message: &str) {
        tracing::debug!(outcome = "error", "{message}");
    }
}

/// Asks on the terminal; `--yes` approves without asking.
///
/// Without a terminal on stdin the answer is "no".
#[derive(Debug, Clone, Copy)]
pub struct TerminalConfirm {
    pub assume_yes: bool,
}

#[async_trait]
impl ConfirmPrompt for TerminalConfirm {
    async fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        if !std::io::stdin().is_terminal() {
            tracing::debug!("no terminal for prompt, declining: {message}");
            return false;
        }

        let prompt = message.to_owned();
        let answer = tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "prompt failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "prompt task failed");
                false
            }
        }
    }
}
