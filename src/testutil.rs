// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test helpers shared by the unit tests.

use {
    crate::{
        error::AppleProvisioningError,
        tool_invocation::{ToolCommand, ToolInvoker, ToolOutput},
        toolchain::XcodeToolchain,
    },
    std::{
        collections::VecDeque,
        path::Path,
        sync::Mutex,
    },
};

/// A [ToolInvoker] that replays scripted outputs instead of spawning tools.
///
/// Outputs are consumed in push order. Commands with no scripted output
/// succeed with empty streams, which keeps tests for multi-invocation flows
/// (e.g. signing a pile of dylibs) from having to script every call.
#[derive(Default)]
pub struct ScriptedInvoker {
    responses: Mutex<VecDeque<ToolOutput>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success(&self, stdout: impl ToString) {
        self.responses
            .lock()
            .unwrap()
            .push_back(ToolOutput {
                command: String::new(),
                success: true,
                stdout: stdout.to_string(),
                stderr: String::new(),
            });
    }

    pub fn push_failure(&self, stdout: impl ToString, stderr: impl ToString) {
        self.responses
            .lock()
            .unwrap()
            .push_back(ToolOutput {
                command: String::new(),
                success: false,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
    }

    /// The rendered command lines this invoker has seen, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl ToolInvoker for ScriptedInvoker {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, AppleProvisioningError> {
        let command_line = command.command_line();
        self.commands.lock().unwrap().push(command_line.clone());

        let mut output = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ToolOutput {
                command: String::new(),
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            });
        output.command = command_line;

        Ok(output)
    }
}

/// A scripted invoker plus a toolchain whose profile directory is a tempdir.
pub struct TestEnv {
    pub toolchain: XcodeToolchain,
    pub invoker: ScriptedInvoker,
    profiles_dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let profiles_dir = tempfile::tempdir().expect("creating tempdir");

        Self {
            toolchain: XcodeToolchain::with_profiles_directory(profiles_dir.path()),
            invoker: ScriptedInvoker::new(),
            profiles_dir,
        }
    }

    pub fn profiles_path(&self) -> &Path {
        self.profiles_dir.path()
    }
}
