use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::domains::sessions::entity::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Accept { message: String },
    Decline,
    /// Interrupted before an answer was given.
    Cancelled,
}

/// The suspension point of `finish`: the accumulated message is shown and
/// the operator accepts it, declines, or interrupts.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, session: &Session, proposed: &str) -> anyhow::Result<Confirmation>;
}

/// Accepts the proposed message unchanged (`--yes`, scripted use).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _session: &Session, proposed: &str) -> anyhow::Result<Confirmation> {
        Ok(Confirmation::Accept {
            message: proposed.to_string(),
        })
    }
}

/// Prompts on the terminal; Ctrl-C while waiting counts as cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, session: &Session, proposed: &str) -> anyhow::Result<Confirmation> {
        {
            let mut err = std::io::stderr().lock();
            writeln!(err, "Squash commit message for '{}':", session.branch_name)?;
            writeln!(err, "----------------------------------------")?;
            writeln!(err, "{proposed}")?;
            writeln!(err, "----------------------------------------")?;
            write!(err, "Merge with this message? [y/N] ")?;
            err.flush()?;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        tokio::select! {
            line = lines.next_line() => {
                Ok(parse_answer(line?.as_deref(), proposed))
            }
            _ = tokio::signal::ctrl_c() => Ok(Confirmation::Cancelled),
        }
    }
}

fn parse_answer(line: Option<&str>, proposed: &str) -> Confirmation {
    match line.map(|l| l.trim().to_lowercase()) {
        Some(answer) if answer == "y" || answer == "yes" => Confirmation::Accept {
            message: proposed.to_string(),
        },
        _ => Confirmation::Decline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_accepts() {
        assert_eq!(
            parse_answer(Some(" Yes \n"), "msg"),
            Confirmation::Accept {
                message: "msg".into()
            }
        );
        assert_eq!(parse_answer(Some("y"), "m"), Confirmation::Accept { message: "m".into() });
        assert_eq!(parse_answer(Some(""), "m"), Confirmation::Decline);
        assert_eq!(parse_answer(Some("no"), "m"), Confirmation::Decline);
        assert_eq!(parse_answer(None, "m"), Confirmation::Decline);
    }
}
