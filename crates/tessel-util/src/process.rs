//! Process execution helpers for external tools.

use std::process::Command;

use crate::error::UtilError;

/// Captured output of an external tool run.
#[derive(Debug)]
pub struct CommandOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Whether the tool exited successfully.
    pub success: bool,
    /// The exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
}

/// Run a command to completion and capture its output.
///
/// # Errors
/// Returns an error if the command cannot be spawned (e.g. binary not found).
/// A non-zero exit code is **not** an error; check `CommandOutput::success` instead.
pub fn run_command(cmd: &mut Command) -> Result<CommandOutput, UtilError> {
    let output = cmd
        .output()
        .map_err(|source| UtilError::CommandExec { source })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
        exit_code: output.status.code(),
    })
}

/// Render a command as a single shell-like line for log output.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn run_command_captures_both_streams() {
        let output =
            run_command(Command::new("sh").arg("-c").arg("echo out; echo err >&2")).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn run_command_nonzero_exit_is_not_an_error() {
        let output = run_command(Command::new("sh").arg("-c").arg("exit 3")).unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
    }

    #[test]
    fn run_command_missing_binary() {
        assert!(run_command(&mut Command::new("nonexistent_binary_xyz_123")).is_err());
    }

    #[test]
    fn describe_joins_program_and_args() {
        let mut cmd = Command::new("javac");
        cmd.args(["-d", "out", "A.java"]);
        assert_eq!(describe(&cmd), "javac -d out A.java");
    }
}
