//! The terminal exec.
//!
//! Replaces the agent process image with the user command; nothing of the
//! agent remains observable afterwards. Returning from here is always a
//! failure.

use crate::env::SanitizedEnv;
use crate::error::AgentError;
use std::ffi::CString;

/// Exec-replaces the current process. The program is looked up on `PATH`
/// and receives exactly the sanitized environment. On success this function
/// does not return.
pub fn exec_user_command(argv: &[String], env: &SanitizedEnv) -> AgentError {
    let command = argv.join(" ");
    match prepare(argv, env) {
        Ok((program, args, envp)) => {
            // execvpe only returns on failure.
            let errno = nix::unistd::execvpe(&program, &args, &envp)
                .expect_err("execvpe returned without replacing the process");
            AgentError::Exec {
                command,
                reason: errno.to_string(),
            }
        }
        Err(err) => err,
    }
}

type ExecArgs = (CString, Vec<CString>, Vec<CString>);

fn prepare(argv: &[String], env: &SanitizedEnv) -> Result<ExecArgs, AgentError> {
    let program = to_cstring(&argv[0])?;
    let args = argv.iter().map(|arg| to_cstring(arg)).collect::<Result<Vec<_>, _>>()?;
    let envp = env
        .iter()
        .map(|(name, value)| to_cstring(&format!("{name}={value}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((program, args, envp))
}

fn to_cstring(value: &str) -> Result<CString, AgentError> {
    CString::new(value).map_err(|_| AgentError::InvalidEnvEntry(value.to_string()))
}
