//! Hook script invocation around backup and WAL archiving.
//!
//! Every hook is handed the same environment contract regardless of
//! which of the eight hook points fired it, plus whatever fields the
//! caller adds (`BARMAN_ERROR`, `BARMAN_STATUS`, ...). Exit status 0
//! means success; for the two *retry* hook points a reserved exit code
//! additionally means "abort the operation outright" rather than merely
//! "this invocation of the hook failed".
//!
//! `pre_*_script`/`post_*_script` are fire-and-continue: their failure is
//! logged but never stops the operation they bracket. `pre_*_retry_script`
//! is fire-and-abort: exit code 63 raises
//! [`barman_core::Error::AbortedRetryHookScript`], which the caller
//! honors before the pre-hook but ignores in the symmetric post-hook (a
//! post-hook has nothing left to stop). Any other nonzero exit is
//! logged and the operation proceeds regardless.

use std::collections::HashMap;
use std::path::PathBuf;

use barman_core::{Error, Result};
use tokio::process::Command;

/// The reserved retry-hook exit code that means "abort the operation",
/// as opposed to "this particular hook invocation failed".
pub const ABORT_STOP_EXIT_CODE: i32 = 63;

/// Runs a configured hook script, if any, with `env` merged over the
/// fixed `BARMAN_*` contract. Returns `Ok(())` for a missing script (no
/// hook configured is not an error) or a non-retry script that exited
/// non-zero (logged, not propagated).
pub async fn run_plain_hook(
    script: Option<&PathBuf>,
    server_name: &str,
    env: &HashMap<String, String>,
) -> Result<()> {
    let Some(script) = script else { return Ok(()) };
    match run(script, server_name, env).await {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            tracing::warn!(
                script = %script.display(),
                code = status.code().unwrap_or(-1),
                "hook script exited non-zero; continuing anyway"
            );
            Ok(())
        }
        Err(e) => {
            tracing::warn!(script = %script.display(), error = %e, "failed to run hook script");
            Ok(())
        }
    }
}

/// Runs a configured *retry* hook script. Exit code
/// [`ABORT_STOP_EXIT_CODE`] raises
/// [`Error::AbortedRetryHookScript`]; any other nonzero exit is logged
/// and otherwise ignored.
pub async fn run_retry_hook(
    script: Option<&PathBuf>,
    server_name: &str,
    env: &HashMap<String, String>,
) -> Result<()> {
    let Some(script) = script else { return Ok(()) };
    let status = run(script, server_name, env).await?;
    match status.code() {
        Some(0) => Ok(()),
        Some(ABORT_STOP_EXIT_CODE) => Err(Error::AbortedRetryHookScript(
            script.display().to_string(),
        )),
        Some(code) => {
            tracing::warn!(
                script = %script.display(),
                code,
                "retry hook script failed; continuing"
            );
            Ok(())
        }
        None => {
            tracing::warn!(script = %script.display(), "retry hook script terminated by signal; continuing");
            Ok(())
        }
    }
}

async fn run(
    script: &PathBuf,
    server_name: &str,
    env: &HashMap<String, String>,
) -> Result<std::process::ExitStatus> {
    let mut command = Command::new(script);
    command.env("BARMAN_SERVER", server_name);
    for (key, value) in env {
        command.env(key, value);
    }
    let status = command.status().await.map_err(|e| Error::CommandFailed {
        command: script.display().to_string(),
        status: -1,
        stderr: e.to_string(),
    })?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_script_is_a_silent_no_op() {
        run_plain_hook(None, "main", &HashMap::new()).await.unwrap();
        run_retry_hook(None, "main", &HashMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn plain_hook_failure_is_swallowed() {
        let script = PathBuf::from("/bin/false");
        run_plain_hook(Some(&script), "main", &HashMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retry_hook_abort_code_is_surfaced() {
        let script = write_script(&format!("#!/bin/sh\nexit {}\n", ABORT_STOP_EXIT_CODE));
        let err = run_retry_hook(Some(&script), "main", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AbortedRetryHookScript(_)));
    }

    #[tokio::test]
    async fn retry_hook_other_nonzero_is_swallowed() {
        let script = write_script("#!/bin/sh\nexit 1\n");
        run_retry_hook(Some(&script), "main", &HashMap::new())
            .await
            .unwrap();
    }

    fn write_script(contents: &str) -> PathBuf {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hook.sh");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(contents.as_bytes()).unwrap();
        }
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::mem::forget(dir); // keep the tempdir alive for the duration of the test process
        path
    }
}
