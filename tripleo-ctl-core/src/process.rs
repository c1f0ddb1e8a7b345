use std::fmt;
use std::path::Path;
use std::process::Command;

use crate::contract::CommandRunner;
use crate::error::ProcessError;

/// A fully assembled external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            ..Invocation::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in self.argv() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if part.is_empty() || part.contains(char::is_whitespace) {
                write!(f, "\"{part}\"")?;
            } else {
                f.write_str(part)?;
            }
        }
        Ok(())
    }
}

/// `sudo cp -f <src> <dest>`
pub fn sudo_copy(src: &Path, dest: &Path) -> Invocation {
    Invocation::new("sudo")
        .args(["cp", "-f"])
        .arg(src.to_string_lossy())
        .arg(dest.to_string_lossy())
}

/// Runs commands on the local host and waits for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        tracing::debug!(command = %invocation, "Running external command");
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status();

        match status {
            Ok(s) if s.success() => {
                tracing::info!(command = %invocation, "External command succeeded");
                Ok(())
            }
            Ok(s) => {
                tracing::error!(command = %invocation, status = %s, "External command exited with non-zero code");
                Err(ProcessError::Exit {
                    command: invocation.to_string(),
                    status: s.to_string(),
                })
            }
            Err(e) => {
                tracing::error!(error = ?e, command = %invocation, "Failed to launch external command");
                Err(ProcessError::Spawn {
                    command: invocation.to_string(),
                    source: e,
                })
            }
        }
    }
}
