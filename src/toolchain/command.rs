//! Process-backed compile collaborator.
//!
//! Each job gets its own scratch directory holding the source, the output
//! artifact and the captured stdout/stderr. Output goes to files rather than
//! pipes, so a chatty compiler cannot block on a full pipe while we wait.
//!
//! On unix the toolchain leads its own process group. A timeout kills the
//! whole group, so driver subprocesses such as `cc1` or `as` die with it.

use crate::core::{JobError, JobResult};
use crate::verify::{Artifact, ArtifactKind, CompileRequest, Compiler};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs::{self, File};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Longest diagnostic kept from a failing compile.
const MAX_DIAGNOSTIC_BYTES: usize = 4000;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How to invoke one toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainCommand {
    pub program: String,
    /// Argument template. `{flags}` splices the resolved flags; `{input}` and
    /// `{output}` are replaced inside any argument.
    pub args: Vec<String>,
    pub output: ArtifactKind,
}

impl ToolchainCommand {
    pub fn new(program: impl Into<String>, output: ArtifactKind) -> Self {
        Self {
            program: program.into(),
            args: Self::default_args(output),
            output,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// GCC/Clang style invocation for the given output kind.
    pub fn default_args(output: ArtifactKind) -> Vec<String> {
        let mode = match output {
            ArtifactKind::Object => "-c",
            ArtifactKind::Listing => "-S",
        };
        ["{flags}", mode, "{input}", "-o", "{output}"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn expand(&self, flags: &[String], input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        let mut args = Vec::with_capacity(self.args.len() + flags.len());
        for arg in &self.args {
            if arg == "{flags}" {
                args.extend(flags.iter().cloned());
            } else {
                args.push(
                    arg.replace("{input}", &input)
                        .replace("{output}", &output),
                );
            }
        }
        args
    }
}

/// Compiles by running the toolchain's configured command.
#[derive(Debug, Clone, Default)]
pub struct CommandCompiler {
    commands: BTreeMap<String, ToolchainCommand>,
}

impl CommandCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, toolchain: impl Into<String>, command: ToolchainCommand) -> Self {
        self.commands.insert(toolchain.into(), command);
        self
    }

    pub fn insert(&mut self, toolchain: impl Into<String>, command: ToolchainCommand) {
        self.commands.insert(toolchain.into(), command);
    }

    pub fn command(&self, toolchain: &str) -> Option<&ToolchainCommand> {
        self.commands.get(toolchain)
    }
}

impl Compiler for CommandCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> JobResult<Artifact> {
        let toolchain = request.toolchain.id.as_str();
        let command = self.commands.get(toolchain).ok_or_else(|| JobError::Io {
            reason: format!("no command configured for toolchain `{toolchain}`"),
        })?;

        let scratch = tempfile::Builder::new()
            .prefix("gallery-job-")
            .tempdir()
            .map_err(|e| JobError::io("create scratch directory", e))?;
        let dir = scratch.path();
        let input = dir.join(&request.input_name);
        let output = dir.join(match command.output {
            ArtifactKind::Object => "output.o",
            ArtifactKind::Listing => "output.s",
        });
        fs::write(&input, request.source).map_err(|e| JobError::io("write source", e))?;
        let stdout = File::create(dir.join("stdout.txt"))
            .map_err(|e| JobError::io("create stdout capture", e))?;
        let stderr_path = dir.join("stderr.txt");
        let stderr =
            File::create(&stderr_path).map_err(|e| JobError::io("create stderr capture", e))?;

        let args = command.expand(request.flags, &input, &output);
        debug!("[{}] {} {}", request.fixture, command.program, args.join(" "));
        let mut process = Command::new(&command.program);
        process
            .args(&args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        process.process_group(0);
        let mut child = process
            .spawn()
            .map_err(|e| JobError::Compile {
                diagnostic: format!("failed to spawn `{}`: {e}", command.program),
            })?;

        let Some(status) = wait_with_deadline(&mut child, request.timeout)? else {
            warn!(
                "[{}] {} timed out after {:?}",
                request.fixture, toolchain, request.timeout
            );
            return Err(JobError::Timeout {
                limit: request.timeout,
            });
        };

        if !status.success() {
            let captured = fs::read(&stderr_path).unwrap_or_default();
            let mut diagnostic = String::from_utf8_lossy(&captured).trim().to_string();
            if diagnostic.is_empty() {
                diagnostic = format!("`{}` exited with {status}", command.program);
            }
            return Err(JobError::Compile {
                diagnostic: truncate(diagnostic, MAX_DIAGNOSTIC_BYTES),
            });
        }

        let bytes = fs::read(&output).map_err(|e| JobError::Compile {
            diagnostic: format!(
                "`{}` succeeded but produced no readable output: {e}",
                command.program
            ),
        })?;
        Ok(Artifact {
            kind: command.output,
            bytes,
        })
    }
}

/// Wait for the child until the deadline. `Ok(None)` means it was killed.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> JobResult<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| JobError::io("wait for toolchain", e))?
        {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            kill_tree(child);
            child
                .wait()
                .map_err(|e| JobError::io("reap timed-out toolchain", e))?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill the child and everything it spawned. The child is not reaped here.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        match libc::pid_t::try_from(child.id()) {
            Ok(pgid) => {
                // SAFETY: killpg only takes integers; the group is led by our
                // unreaped child, so its id cannot have been recycled.
                if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
                    return;
                }
                debug!(
                    "killpg({pgid}) failed: {}",
                    std::io::Error::last_os_error()
                );
            }
            Err(_) => debug!("pid {} does not fit pid_t", child.id()),
        }
    }
    if let Err(e) = child.kill() {
        debug!("kill after timeout failed (process already gone?): {e}");
    }
}

fn truncate(mut text: String, limit: usize) -> String {
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str(" [truncated]");
    }
    text
}
