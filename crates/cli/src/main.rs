use std::process::ExitCode;

fn main() -> ExitCode {
    faultdesk_cli::run()
}
