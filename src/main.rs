// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Binary entry point: parses the CLI surface, installs signal handlers,
//! and runs the server with the reference echo responder.

use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use reactord::app::EchoResponder;
use reactord::cli::Args;
use reactord::error::ServerError;

fn main() -> ExitCode {
    reactord::init_logging();

    let args = match Args::parse_validated() {
        Ok(args) => args,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = reactord::signals::install(&shutdown) {
        tracing::error!(error = %e, "failed to install signal handlers");
        return ExitCode::from(1);
    }

    match reactord::run(args, Arc::new(EchoResponder), shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            ExitCode::from(fatal_exit_code(&e))
        }
    }
}

fn fatal_exit_code(e: &ServerError) -> u8 {
    e.exit_code() as u8
}
