//! Binary entrypoint that follows the operator's conversations.

use std::process::ExitCode;

use chat_tracker::start_chat_tracker;

/// Poll the chat webhook and log list and message changes until Ctrl-C.
fn main() -> ExitCode {
    start_chat_tracker::run_tracker()
}
