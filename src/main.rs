use std::process;

use rtstats::cli::Args;

fn main() {
    let args = Args::parse_from_env();
    match rtstats::run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(3);
        }
    }
}
