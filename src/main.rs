use clap::Parser;
use std::process;
use tex_expander::cli::{print_api_token, run_store_command, Commands, Tex};
use tex_expander::{daemon_status, logging, run_daemon_worker, run_foreground, start_daemon, stop_daemon};

fn main() {
    let tex = Tex::parse();

    let result = match tex.commands {
        Some(Commands::DaemonWorker) => run_daemon_worker(),
        Some(Commands::Start) => start_daemon(),
        Some(Commands::Stop) => stop_daemon(),
        Some(Commands::Status) => daemon_status(),
        Some(Commands::Run) => run_foreground(),
        Some(Commands::Token) => print_api_token(),
        Some(command) => {
            let _logging = logging::init();
            run_store_command(command)
        }
        None => daemon_status(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
