use colored::Colorize;
use rkite::KiteError;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match rkite::cli::run() {
        Ok(()) => {}
        Err(KiteError::Exit { code, message }) => {
            match code {
                _ if message.is_empty() => {}
                0 => println!("{}", message),
                _ => eprintln!("{}", message.red()),
            }
            process::exit(code);
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(e.exit_code());
        }
    }
}
