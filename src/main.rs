mod cli;
mod config;
mod error;
mod hash;
mod logging;
mod upgrade;
mod version;

use cli::Cli;

fn main() {
    // Upgrade failures have already been written to the upgrade log by the
    // time they get here
    if let Err(err) = Cli::handle_command_line() {
        eprintln!("{}", err);
        std::process::exit(err.kind().exit_code());
    }
}
