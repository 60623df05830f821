// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Container entrypoint: bootstrap, launch services in the background, announce, hold

mod error;
pub mod fork;
pub mod launcher;
pub mod logger;
pub mod plan;

pub use error::{exit_code, Error, ErrorKind, USAGE_EXIT_CODE};
pub use launcher::{Launcher, Running};
pub use plan::{Mode, Output, Plan, ProcessSpec};
