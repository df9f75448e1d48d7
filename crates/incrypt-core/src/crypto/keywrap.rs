use std::io::Write;
use std::process::{Command, Stdio};

use crate::error::{IncryptError, Result};

/// Environment variable overriding the key-management program (tests point
/// this at a stub; users at a gpg replacement).
pub const KEY_TOOL_ENV: &str = "INCRYPT_GPG";

const DEFAULT_PROGRAM: &str = "gpg";

/// Handle on the external key-management program. The raw repository key is
/// escrowed to recipient public keys at init and recovered on every read;
/// this process never sees the recipients' secrets.
pub struct KeyTool {
    program: String,
}

impl KeyTool {
    #[cfg(test)]
    pub(crate) fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolve the program from the environment, falling back to `gpg`.
    pub fn from_env() -> Self {
        let program = std::env::var(KEY_TOOL_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
        Self { program }
    }

    /// Wrap `key` to every recipient: `<tool> -q -e -r R1 -r R2 ...`.
    pub fn wrap(&self, key: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
        let mut args = vec!["-q".to_string(), "-e".to_string()];
        for recipient in recipients {
            args.push("-r".to_string());
            args.push(recipient.clone());
        }
        self.pipe(&args, key)
    }

    /// Unwrap a key blob: `<tool> -q -d`.
    pub fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.pipe(&["-q".to_string(), "-d".to_string()], wrapped)
    }

    fn pipe(&self, args: &[String], input: &[u8]) -> Result<Vec<u8>> {
        tracing::debug!(program = %self.program, ?args, "invoking key tool");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IncryptError::KeyTool(format!("failed to spawn '{}': {e}", self.program)))?;

        child
            .stdin
            .take()
            .expect("stdin piped above")
            .write_all(input)
            .map_err(|e| IncryptError::KeyTool(format!("writing to '{}': {e}", self.program)))?;

        let output = child
            .wait_with_output()
            .map_err(|e| IncryptError::KeyTool(format!("waiting for '{}': {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IncryptError::KeyTool(format!(
                "'{}' exited with {}: {}",
                self.program,
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}
