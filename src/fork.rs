// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::convert::TryFrom;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::Signal;
use tokio::process::Command;

use crate::error::ErrorKind;
use crate::plan::{Mode, Output, ProcessSpec};
use crate::Error;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

impl StdIoConf {
    pub fn inherit() -> Self {
        StdIoConf {
            stdin: Stdio::inherit(),
            stderr: Stdio::inherit(),
            stdout: Stdio::inherit(),
        }
    }

    /// Opens the log file, if any. stdout and stderr share one open file so their writes interleave
    /// instead of overwriting each other.
    pub fn for_output(output: &Output) -> Result<Self, Error> {
        match output {
            Output::Inherit => Ok(Self::inherit()),
            Output::Log(path) => {
                let log_err = |source| ErrorKind::LogFile {
                    path: path.clone(),
                    source,
                };

                let stdout = File::create(path).map_err(log_err)?;
                let stderr = stdout.try_clone().map_err(log_err)?;

                Ok(StdIoConf {
                    stdin: Stdio::inherit(),
                    stderr: Stdio::from(stderr),
                    stdout: Stdio::from(stdout),
                })
            }
        }
    }

    pub fn for_spec(spec: &ProcessSpec) -> Result<Self, Error> {
        let mut stdio = Self::for_output(&spec.output)?;

        // like a shell `&` job, background processes never read the container's stdin
        if spec.mode == Mode::Background {
            stdio.stdin = Stdio::null();
        }

        Ok(stdio)
    }
}

/// A background process the launcher started
#[derive(Debug)]
pub struct Child {
    pub name: String,
    pub log: Option<PathBuf>,
    pub child: tokio::process::Child,
}

impl Child {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

fn command(spec: &ProcessSpec, stdio: StdIoConf) -> Command {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        // children outlive any handle the launcher holds on them
        .kill_on_drop(false)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr);

    command
}

fn spawn_err(spec: &ProcessSpec) -> impl FnOnce(std::io::Error) -> ErrorKind + '_ {
    move |source| ErrorKind::Spawn {
        name: spec.name.clone(),
        source,
    }
}

/// Runs the process and waits for it to exit, the status is returned as is
pub async fn run_to_completion(spec: &ProcessSpec) -> Result<ExitStatus, Error> {
    let stdio = StdIoConf::for_spec(spec)?;

    let status = command(spec, stdio)
        .status()
        .await
        .map_err(spawn_err(spec))?;

    Ok(status)
}

/// Spawns the process without waiting on it
pub fn new_process(spec: &ProcessSpec) -> Result<Child, Error> {
    let stdio = StdIoConf::for_spec(spec)?;

    let child = command(spec, stdio).spawn().map_err(spawn_err(spec))?;

    Ok(Child {
        name: spec.name.clone(),
        log: spec.output.log_path().map(Into::into),
        child,
    })
}

/// Human readable exit status, with the signal name when there is one
pub fn describe(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }

    match status.signal() {
        Some(signal) => match Signal::try_from(signal) {
            Ok(signal) => format!("killed by {}", signal.as_str()),
            Err(_) => format!("killed by signal {}", signal),
        },
        None => status.to_string(),
    }
}
