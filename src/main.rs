//! Binary entrypoint that serves the study assistant API.

use std::process::ExitCode;

use study_assistant::start_study_assistant;

fn main() -> ExitCode {
    start_study_assistant::run()
}
