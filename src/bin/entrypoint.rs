// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;

use clap::{App, Arg, ArgMatches};
use tokio::runtime;
use tracing::{error, info};

use entrypointrc::{logger, Error, Launcher, Plan};

const CONFIG: &str = "config";
const PRINT_PLAN: &str = "print-plan";
const VERBOSE: &str = "verbose";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
}

impl<'a, 'b> SetupClapApp for App<'a, 'b> {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }
}

fn app() -> App<'static, 'static> {
    App::new("entrypoint")
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name(CONFIG)
                .short("c")
                .long(CONFIG)
                .value_name("FILE")
                .help("TOML plan to launch instead of the built-in computer use demo plan")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(PRINT_PLAN)
                .long(PRINT_PLAN)
                .help("print the plan that would be launched and exit"),
        )
        .arg(
            Arg::with_name(VERBOSE)
                .short("v")
                .long(VERBOSE)
                .help("debug level diagnostics on stderr"),
        )
}

fn load_plan(args: &ArgMatches<'_>) -> Result<Plan, Error> {
    match args.value_of_os(CONFIG) {
        Some(path) => Plan::from_path(path),
        None => Ok(Plan::default()),
    }
}

async fn run(args: ArgMatches<'static>) -> Result<(), Error> {
    let plan = load_plan(&args)?;

    if args.is_present(PRINT_PLAN) {
        print!("{}", plan.to_toml_string()?);
        return Ok(());
    }

    let launcher = Launcher::new(plan)?;
    info!(
        processes = launcher.plan().processes.len(),
        "entrypoint started"
    );

    launcher.run(&mut io::stdout()).await
}

fn main() {
    let args = app().get_matches();
    logger::init(args.is_present(VERBOSE));

    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to initialize tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        let code = e.exit_code();
        error!(code, "entrypoint exiting: {}", e);
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = app()
            .get_matches_from_safe(vec!["entrypoint", "-c", "/etc/plan.toml", "-v"])
            .expect("args should parse");

        assert_eq!(args.value_of(CONFIG), Some("/etc/plan.toml"));
        assert!(args.is_present(VERBOSE));
        assert!(!args.is_present(PRINT_PLAN));
    }

    #[test]
    fn test_default_plan_without_config() {
        let args = app()
            .get_matches_from_safe(vec!["entrypoint"])
            .expect("args should parse");

        let plan = load_plan(&args).expect("default plan");
        assert_eq!(plan, Plan::default());
    }
}
