// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The ordered set of processes the entrypoint starts

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::Error;

/// Port the web UI listens on, the UI facing proxy on 8080 forwards to it
pub const STREAMLIT_PORT: &str = "8501";
pub const API_PORT: u16 = 8000;

pub const HTTP_SERVER_LOG: &str = "/tmp/server_logs.txt";
pub const STREAMLIT_LOG: &str = "/tmp/streamlit_stdout.log";
pub const API_SERVER_LOG: &str = "/tmp/api_server.log";

/// How the launcher treats a process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Run to completion before anything else starts, must exit 0
    Bootstrap,
    /// Spawn and never wait on
    Background,
}

/// Where the stdout and stderr of a process go
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Output {
    /// Share the entrypoint's own streams
    Inherit,
    /// Both streams to this file, truncated on launch
    Log(PathBuf),
}

impl Output {
    fn is_inherit(&self) -> bool {
        *self == Output::Inherit
    }

    pub fn log_path(&self) -> Option<&Path> {
        match self {
            Output::Inherit => None,
            Output::Log(path) => Some(path),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Output::Inherit
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    pub name: String,
    pub program: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Output::is_inherit")]
    pub output: Output,
    /// Overrides applied on top of the inherited environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn bootstrap(name: &str, program: &str) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            mode: Mode::Bootstrap,
            output: Output::Inherit,
            env: BTreeMap::new(),
        }
    }

    pub fn background<P: Into<PathBuf>>(name: &str, program: &str, log: P) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            mode: Mode::Background,
            output: Output::Log(log.into()),
            env: BTreeMap::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
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

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Everything the entrypoint launches, in launch order, and the lines it prints once launched
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub banner: Vec<String>,
    #[serde(rename = "process", default)]
    pub processes: Vec<ProcessSpec>,
}

impl Plan {
    /// The computer use demo container: X/VNC stack, the noVNC bridge, then the file server,
    /// the streamlit UI and the API server
    pub fn computer_use_demo() -> Self {
        let processes = vec![
            // every path is relative to the image directory the entrypoint runs from
            ProcessSpec::bootstrap("display", "./start_all.sh"),
            ProcessSpec::bootstrap("novnc", "./novnc_startup.sh"),
            ProcessSpec::background("http-server", "python", HTTP_SERVER_LOG).arg("http_server.py"),
            ProcessSpec::background("streamlit", "python", STREAMLIT_LOG)
                .args(vec!["-m", "streamlit", "run", "computer_use_demo/streamlit.py"])
                .env("STREAMLIT_SERVER_PORT", STREAMLIT_PORT),
            ProcessSpec::background("api-server", "python", API_SERVER_LOG)
                .args(vec!["-m", "uvicorn", "api_server:app", "--host", "0.0.0.0"])
                .arg("--port")
                .arg(API_PORT.to_string()),
        ];

        let banner = vec![
            "✨ Computer Use Demo is ready!".to_string(),
            "➡️  Open http://localhost:8080 in your browser to begin".to_string(),
            format!(
                "➡️  API server is available at http://localhost:{}",
                API_PORT
            ),
        ];

        Self { banner, processes }
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, Error> {
        let plan: Self = toml::from_str(toml)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let toml = fs::read_to_string(path).map_err(|e| {
            ErrorKind::Plan(format!("could not read {}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&toml)
    }

    pub fn to_toml_string(&self) -> Result<String, Error> {
        toml::to_string(self).map_err(|e| Error::from(format!("could not render plan: {}", e)))
    }

    /// Checks the plan can be launched as is, nothing should be started from a plan that fails this
    pub fn validate(&self) -> Result<(), Error> {
        if self.banner.is_empty() {
            return Err(ErrorKind::Plan("the banner must have at least one line".to_string()).into());
        }

        let mut names = HashSet::new();
        let mut logs = HashSet::new();
        let mut seen_background: Option<&str> = None;

        for spec in &self.processes {
            if spec.name.trim().is_empty() {
                return Err(ErrorKind::Plan("process names must not be empty".to_string()).into());
            }
            if spec.program.trim().is_empty() {
                return Err(
                    ErrorKind::Plan(format!("`{}` has no program", spec.name)).into()
                );
            }
            if !names.insert(spec.name.as_str()) {
                return Err(
                    ErrorKind::Plan(format!("`{}` is listed more than once", spec.name)).into(),
                );
            }
            if let Some(path) = spec.output.log_path() {
                if !logs.insert(path) {
                    return Err(ErrorKind::Plan(format!(
                        "`{}` shares its log file {} with another process",
                        spec.name,
                        path.display()
                    ))
                    .into());
                }
            }

            match (spec.mode, seen_background) {
                (Mode::Background, None) => seen_background = Some(spec.name.as_str()),
                (Mode::Bootstrap, Some(background)) => {
                    return Err(ErrorKind::Plan(format!(
                        "bootstrap `{}` must come before background process `{}`",
                        spec.name, background
                    ))
                    .into())
                }
                _ => (),
            }
        }

        Ok(())
    }

    pub fn bootstraps(&self) -> impl Iterator<Item = &ProcessSpec> {
        self.processes
            .iter()
            .filter(|spec| spec.mode == Mode::Bootstrap)
    }

    pub fn services(&self) -> impl Iterator<Item = &ProcessSpec> {
        self.processes
            .iter()
            .filter(|spec| spec.mode == Mode::Background)
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::computer_use_demo()
    }
}
