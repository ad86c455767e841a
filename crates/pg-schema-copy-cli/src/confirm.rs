//! Confirmation before overwriting the target.

use dialoguer::Confirm;
use pg_schema_copy::CopyError;
use std::io::IsTerminal;

/// Ask before a run that deletes target rows.
///
/// Without a terminal there is nobody to ask, so the run is refused and
/// `--yes` is required.
pub fn confirm_destructive(prompt: &str) -> Result<bool, CopyError> {
    if !std::io::stdin().is_terminal() {
        return Err(CopyError::Config(
            "refusing to overwrite the target without confirmation; pass --yes to run non-interactively"
                .to_string(),
        ));
    }

    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| CopyError::Io(std::io::Error::other(e.to_string())))
}
