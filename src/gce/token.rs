//! Access-token resolution for the Compute Engine adapter.

use std::ffi::OsString;

use crate::command::CommandRunner;
use crate::config::ComputeConfig;
use crate::provider::ProviderError;

/// Returns the bearer token used for API calls.
///
/// A token set in configuration wins. Otherwise the token is minted by
/// `gcloud auth print-access-token`, which honours the caller's active
/// `gcloud` account or application-default credentials.
///
/// # Errors
///
/// Returns [`ProviderError::Auth`] when `gcloud` cannot be run, exits with a
/// non-zero status, or prints nothing.
pub fn resolve_access_token<R: CommandRunner>(
    config: &ComputeConfig,
    runner: &R,
) -> Result<String, ProviderError> {
    if let Some(token) = config.access_token() {
        return Ok(token.to_owned());
    }

    let args = [OsString::from("auth"), OsString::from("print-access-token")];
    let output = runner
        .run(&config.gcloud_bin, &args)
        .map_err(|err| ProviderError::Auth {
            message: err.to_string(),
        })?;

    if !output.is_success() {
        let status = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        return Err(ProviderError::Auth {
            message: format!(
                "{} exited with status {status}: {}",
                config.gcloud_bin,
                output.stderr.trim()
            ),
        });
    }

    let token = output.stdout.trim();
    if token.is_empty() {
        return Err(ProviderError::Auth {
            message: format!("{} printed an empty access token", config.gcloud_bin),
        });
    }
    Ok(token.to_owned())
}
