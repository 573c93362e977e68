//! Remote tab completion
//!
//! Three tiers, each tried only when the previous one yields nothing:
//! command names, file names, then a plain directory listing filtered
//! locally. Every suggestion is the full input with its last word
//! completed, so it always starts with `partial`.

use ft_core::FtResult;

use crate::shell::{quote, ShellSession};

/// Raw candidates read from the remote per tier before filtering
const CANDIDATE_LIMIT: usize = 200;

/// Suggestions for `partial`, at most `limit`
pub async fn complete(
    shell: &ShellSession,
    partial: &str,
    cwd: Option<&str>,
    limit: usize,
) -> FtResult<Vec<String>> {
    if partial.trim().is_empty() {
        return Ok(Vec::new());
    }

    let (head, word) = match partial.rfind(char::is_whitespace) {
        Some(idx) => partial.split_at(idx + 1),
        None => ("", partial),
    };

    if head.is_empty() {
        let commands = remote_candidates(shell, "compgen -c --", word, cwd).await?;
        let found = finalize(partial, head, commands, limit);
        if !found.is_empty() {
            return Ok(found);
        }
    }

    let files = remote_candidates(shell, "compgen -f --", word, cwd).await;
    if let Ok(files) = files {
        let found = finalize(partial, head, files, limit);
        if !found.is_empty() {
            return Ok(found);
        }
    }

    let (dir_part, name_part) = match word.rfind('/') {
        Some(idx) => word.split_at(idx + 1),
        None => ("", word),
    };
    let listing_dir = if dir_part.is_empty() { "." } else { dir_part };
    let listing = shell
        .probe(
            &format!("ls -1a -- {} 2>/dev/null | head -n {}", quote(listing_dir), CANDIDATE_LIMIT),
            cwd,
        )
        .await?;
    let entries = listing
        .stdout
        .lines()
        .filter(|name| *name != "." && *name != ".." && name.starts_with(name_part))
        .map(|name| format!("{}{}", dir_part, name))
        .collect();

    Ok(finalize(partial, head, entries, limit))
}

async fn remote_candidates(
    shell: &ShellSession,
    generator: &str,
    word: &str,
    cwd: Option<&str>,
) -> FtResult<Vec<String>> {
    let command = format!(
        "{} {} 2>/dev/null | head -n {}",
        generator,
        quote(word),
        CANDIDATE_LIMIT
    );
    let output = shell.probe(&command, cwd).await?;
    Ok(output.stdout.lines().map(str::to_string).collect())
}

/// Prefix with `head`, keep literal matches of `partial`, dedupe, cap
fn finalize(partial: &str, head: &str, candidates: Vec<String>, limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for candidate in candidates {
        if candidate.is_empty() {
            continue;
        }
        let suggestion = format!("{}{}", head, candidate);
        if suggestion.starts_with(partial) && !out.contains(&suggestion) {
            out.push(suggestion);
            if out.len() >= limit {
                break;
            }
        }
    }
    out
}
