// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution of external host tools with captured output.
//!
//! Everything in this crate that talks to the host toolchain does so through
//! the [ToolInvoker] trait. The production implementation,
//! [SystemToolInvoker], spawns real processes and registers each child with a
//! [ProcessScope] so an interrupted caller can terminate every in-flight
//! subprocess as a group instead of leaving orphans behind.

use {
    crate::error::AppleProvisioningError,
    log::debug,
    std::{
        io::Read,
        process::{Child, Command, Stdio},
        sync::{Arc, Mutex, Weak},
    },
};

/// A command line for an external tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
            args: vec![],
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl ToString>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Render a printable command line for diagnostics.
    ///
    /// This is for error messages and logging only. It is not shell-quoted
    /// and must never be fed back to a shell.
    pub fn command_line(&self) -> String {
        let mut s = self.program.clone();

        for arg in &self.args {
            s.push(' ');
            s.push_str(arg);
        }

        s
    }
}

/// Captured result of running an external tool to completion.
#[derive(Clone, Debug)]
pub struct ToolOutput {
    /// The rendered command line that produced this output.
    pub command: String,
    /// Whether the tool exited with status zero.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Fail with the originating command line and both captured streams if
    /// the tool exited non-zero.
    pub fn success_or_error(self) -> Result<Self, AppleProvisioningError> {
        if self.success {
            Ok(self)
        } else {
            Err(AppleProvisioningError::ToolFailure {
                command: self.command,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external tools and captures their output.
pub trait ToolInvoker: Send + Sync {
    /// Run a tool to completion.
    ///
    /// Returns `Ok` whenever the process could be spawned and reaped,
    /// regardless of its exit status. Callers that require success should
    /// chain [ToolOutput::success_or_error].
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, AppleProvisioningError>;
}

type SharedChild = Arc<Mutex<Option<Child>>>;

/// Tracks spawned subprocesses so they can be terminated as a group.
///
/// A scope is created by the embedding process and cloned into each
/// [SystemToolInvoker]. Registration holds weak references, so children that
/// run to completion fall out of the scope on their own. There is no global
/// registry; whoever owns the scope owns cancellation.
#[derive(Clone, Default)]
pub struct ProcessScope {
    children: Arc<Mutex<Vec<Weak<Mutex<Option<Child>>>>>>,
}

impl ProcessScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, child: &SharedChild) {
        let mut children = self.children.lock().expect("process scope lock poisoned");
        children.retain(|c| c.upgrade().is_some());
        children.push(Arc::downgrade(child));
    }

    /// Kill every subprocess in this scope that is still running.
    ///
    /// Kill failures are ignored: the usual cause is the child exiting
    /// between our liveness check and the kill.
    pub fn terminate_all(&self) {
        let children = self.children.lock().expect("process scope lock poisoned");

        for weak in children.iter() {
            if let Some(shared) = weak.upgrade() {
                if let Ok(mut guard) = shared.lock() {
                    if let Some(child) = guard.as_mut() {
                        debug!("terminating subprocess {}", child.id());
                        let _ = child.kill();
                    }
                }
            }
        }
    }
}

/// [ToolInvoker] that spawns real subprocesses.
pub struct SystemToolInvoker {
    scope: ProcessScope,
}

impl SystemToolInvoker {
    pub fn new(scope: ProcessScope) -> Self {
        Self { scope }
    }
}

impl ToolInvoker for SystemToolInvoker {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, AppleProvisioningError> {
        let command_line = command.command_line();
        debug!("running `{}`", command_line);

        let mut child = Command::new(command.program())
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AppleProvisioningError::ToolSpawn {
                command: command_line.clone(),
                source,
            })?;

        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");

        let shared: SharedChild = Arc::new(Mutex::new(Some(child)));
        self.scope.register(&shared);

        // Drain stderr on a helper thread so a chatty tool cannot deadlock
        // against a full pipe while we read stdout.
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf);
            buf
        });

        let mut stdout_buf = Vec::new();
        stdout_pipe.read_to_end(&mut stdout_buf)?;

        let stderr_buf = stderr_thread.join().unwrap_or_default();

        // The child lock is only held for the final reap, never while
        // blocked on pipe reads, so terminate_all() can always get in.
        let status = {
            let mut guard = shared.lock().expect("child lock poisoned");
            let mut child = guard.take().expect("child already reaped");
            child.wait()?
        };

        Ok(ToolOutput {
            command: command_line,
            success: status.success(),
            stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
            stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
        })
    }
}
