// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::convert::Infallible;
use std::io::{self, Write};

use futures::future;
use tracing::{debug, error, info, warn};

use crate::error::ErrorKind;
use crate::fork::{self, Child};
use crate::plan::Plan;
use crate::Error;

/// Launch programs
///
/// Rules:
/// - bootstraps run one after the other, the first failure ends the launch
/// - background processes are started once every bootstrap succeeded, and are never
///   restarted, signalled or read from
/// - the banner is printed once, after the background processes were started
#[derive(Debug)]
pub struct Launcher {
    plan: Plan,
}

impl Launcher {
    pub fn new(plan: Plan) -> Result<Self, Error> {
        plan.validate()?;
        Ok(Self { plan })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Runs the bootstraps, starts the background processes and writes the banner to `out`
    pub async fn launch<W: Write>(&self, out: &mut W) -> Result<Running, Error> {
        for spec in self.plan.bootstraps() {
            info!(name = %spec.name, program = %spec.program, "running bootstrap");

            let status = fork::run_to_completion(spec).await?;
            if !status.success() {
                return Err(ErrorKind::BootstrapFailed {
                    name: spec.name.clone(),
                    status,
                }
                .into());
            }

            debug!(name = %spec.name, "bootstrap finished");
        }

        let mut children = Vec::new();
        for spec in self.plan.services() {
            match fork::new_process(spec) {
                Ok(child) => {
                    info!(
                        name = %child.name,
                        pid = ?child.id(),
                        log = ?child.log,
                        "started background process"
                    );
                    children.push(child);
                }
                // a failed background launch is the same as a crashed service, the rest still starts
                Err(e) => error!(name = %spec.name, "failed to start background process: {}", e),
            }
        }

        // the services are already up, a lost banner must not end the container
        if let Err(e) = announce(&self.plan.banner, out) {
            error!("failed to write the banner: {}", e);
        }

        Ok(Running { children })
    }

    /// Launches, then holds forever. Only returns if the launch fails.
    pub async fn run<W: Write>(self, out: &mut W) -> Result<(), Error> {
        let running = self.launch(out).await?;
        match running.hold().await {}
    }
}

fn announce<W: Write>(banner: &[String], out: &mut W) -> io::Result<()> {
    for line in banner {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}

/// The background processes of a completed launch
#[derive(Debug)]
pub struct Running {
    children: Vec<Child>,
}

impl Running {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.name.as_str())
    }

    /// Never completes
    ///
    /// Background processes started by the launch are reaped and logged as they exit, nothing is
    /// restarted. Orphans re-parented to the entrypoint, e.g. daemons left behind by a bootstrap,
    /// are not waited on.
    pub async fn hold(self) -> Infallible {
        let reaped = self.children.into_iter().map(|mut child| async move {
            match child.child.wait().await {
                Ok(status) => warn!(
                    name = %child.name,
                    status = %fork::describe(status),
                    "background process exited"
                ),
                Err(e) => warn!(name = %child.name, "could not wait on background process: {}", e),
            }
        });

        future::join_all(reaped).await;
        debug!("all background processes exited, holding");

        future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::plan::ProcessSpec;

    fn sh_bootstrap(name: &str, script: &str) -> ProcessSpec {
        ProcessSpec::bootstrap(name, "sh").args(vec!["-c", script])
    }

    fn sh_background(name: &str, log: &Path, script: &str) -> ProcessSpec {
        ProcessSpec::background(name, "sh", log).args(vec!["-c", script])
    }

    fn banner() -> Vec<String> {
        vec![
            "ready".to_string(),
            "ui at http://localhost:8080".to_string(),
            "api at http://localhost:8000".to_string(),
        ]
    }

    fn plan(dir: &Path, display: &str, bridge: &str) -> Plan {
        Plan {
            banner: banner(),
            processes: vec![
                sh_bootstrap("display", display),
                sh_bootstrap("novnc", bridge),
                sh_background("http-server", &dir.join("server.log"), "echo server"),
                sh_background(
                    "streamlit",
                    &dir.join("streamlit.log"),
                    "echo port=$STREAMLIT_SERVER_PORT >&2",
                )
                .env("STREAMLIT_SERVER_PORT", "8501"),
                sh_background("api-server", &dir.join("api.log"), "echo api"),
            ],
        }
    }

    impl Running {
        async fn wait_all(self) {
            for mut child in self.children {
                child.child.wait().await.expect("failed to wait");
            }
        }
    }

    #[tokio::test]
    async fn test_launch() {
        let dir = tempfile::tempdir().expect("no tempdir");
        let launcher = Launcher::new(plan(dir.path(), "exit 0", "exit 0")).expect("valid plan");

        let mut out = Vec::new();
        let running = launcher.launch(&mut out).await.expect("launch failed");

        assert_eq!(running.len(), 3);
        assert_eq!(
            running.names().collect::<Vec<_>>(),
            vec!["http-server", "streamlit", "api-server"]
        );
        running.wait_all().await;

        let out = String::from_utf8(out).expect("banner is utf8");
        assert_eq!(
            out,
            "ready\nui at http://localhost:8080\napi at http://localhost:8000\n"
        );

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).expect("missing log");
        assert_eq!(read("server.log"), "server\n");
        assert_eq!(read("streamlit.log"), "port=8501\n");
        assert_eq!(read("api.log"), "api\n");
    }

    #[tokio::test]
    async fn test_display_failure_stops_launch() {
        let dir = tempfile::tempdir().expect("no tempdir");
        let launcher = Launcher::new(plan(dir.path(), "exit 3", "exit 0")).expect("valid plan");

        let mut out = Vec::new();
        let err = launcher
            .launch(&mut out)
            .await
            .expect_err("display bootstrap fails");

        match err.kind() {
            ErrorKind::BootstrapFailed { name, .. } => assert_eq!(name, "display"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.exit_code(), 3);
        assert!(out.is_empty());
        assert_eq!(fs::read_dir(dir.path()).expect("no dir").count(), 0);
    }

    #[tokio::test]
    async fn test_bridge_failure_stops_launch() {
        let dir = tempfile::tempdir().expect("no tempdir");
        let marker = dir.path().join("display-ran");
        let display = format!("touch {}", marker.display());
        let launcher = Launcher::new(plan(dir.path(), &display, "exit 1")).expect("valid plan");

        let mut out = Vec::new();
        let err = launcher
            .launch(&mut out)
            .await
            .expect_err("bridge bootstrap fails");

        match err.kind() {
            ErrorKind::BootstrapFailed { name, .. } => assert_eq!(name, "novnc"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_ne!(err.exit_code(), 0);
        assert!(out.is_empty());

        // only the display bootstrap left a trace
        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("no dir")
            .map(|e| e.expect("bad entry").file_name())
            .collect();
        assert_eq!(entries, vec!["display-ran"]);
    }

    #[tokio::test]
    async fn test_failed_service_does_not_stop_launch() {
        let dir = tempfile::tempdir().expect("no tempdir");
        let mut plan = plan(dir.path(), "exit 0", "exit 0");
        plan.processes[2].program = "/nonexistent/http_server".to_string();
        plan.processes[3] = sh_background("streamlit", &dir.path().join("streamlit.log"), "exit 9");

        let launcher = Launcher::new(plan).expect("valid plan");
        let mut out = Vec::new();
        let running = launcher.launch(&mut out).await.expect("launch failed");

        assert_eq!(
            running.names().collect::<Vec<_>>(),
            vec!["streamlit", "api-server"]
        );
        running.wait_all().await;
        assert_eq!(String::from_utf8(out).expect("utf8").lines().count(), 3);
    }

    #[tokio::test]
    async fn test_hold_outlives_children() {
        let dir = tempfile::tempdir().expect("no tempdir");
        let launcher = Launcher::new(plan(dir.path(), "true", "true")).expect("valid plan");

        let mut out = Vec::new();
        let running = launcher.launch(&mut out).await.expect("launch failed");

        // every child exits almost immediately, holding must not
        let held = tokio::time::timeout(Duration::from_millis(500), running.hold()).await;
        assert!(held.is_err());
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[tokio::test]
    async fn test_banner_write_failure_keeps_services() {
        let dir = tempfile::tempdir().expect("no tempdir");
        let launcher = Launcher::new(plan(dir.path(), "exit 0", "exit 0")).expect("valid plan");

        let running = launcher
            .launch(&mut ClosedPipe)
            .await
            .expect("a lost banner is not a failed launch");

        assert_eq!(running.len(), 3);
        running.wait_all().await;
        assert_eq!(
            fs::read_to_string(dir.path().join("api.log")).expect("missing log"),
            "api\n"
        );
    }

    #[test]
    fn test_invalid_plan_is_rejected() {
        let plan = Plan {
            banner: Vec::new(),
            processes: Vec::new(),
        };

        assert!(Launcher::new(plan).is_err());
    }
}
