//! Development conversation store server.
//! Run with: cargo run --bin halldyll-chat-store

use std::process::ExitCode;

use halldyll_chat::start_chat;

fn main() -> ExitCode {
    start_chat::run_store_server()
}
