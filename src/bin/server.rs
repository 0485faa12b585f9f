//! Chat-status server binary.
//! Run with: cargo run --bin chat-status-server

use std::process::ExitCode;

use chat_tracker::start_chat_tracker;

fn main() -> ExitCode {
    start_chat_tracker::run_status_server()
}
