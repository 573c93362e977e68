//! CLI command implementations

mod exec;
mod fanout;
mod sessions;
mod shell;
mod status;

use std::future::Future;
use std::io::Write;

use anyhow::Result;

use crate::client::ClientResult;
use crate::output::print_warning;

pub use exec::{exec_command, poll_command};
pub use fanout::{execution_command, run_command};
pub use sessions::{close_command, open_command, sessions_command};
pub use shell::shell_command;
pub use status::health_command;

/// Run `attempt`, asking before retrying with confirmation when the
/// engine requires it and `yes` was not given
async fn with_confirmation<T, F, Fut>(yes: bool, attempt: F) -> Result<T>
where
    F: Fn(bool) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    match attempt(yes).await {
        Err(e) if e.needs_confirmation() && !yes => {
            print_warning(&e.to_string());
            if !ask("Run it anyway?")? {
                anyhow::bail!("Aborted");
            }
            Ok(attempt(true).await?)
        }
        other => Ok(other?),
    }
}

/// Yes/no prompt on the terminal, defaulting to no
fn ask(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
