mod doctor;
mod run;
mod serve;
mod tokens;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the API server and voice dashboard")
        .command("run", "Run a single coding task and print the outcome")
        .print();

    GuideSection::new("Setup")
        .command("token", "Generate an API token and its hash for solo.toml")
        .command("doctor", "Check the agent binary and local services")
        .print();

    GuideSection::new("Flags")
        .text("serve  [--host H] [--port P] [--config PATH] [--verbose]")
        .text("run    --prompt TEXT [--project NAME | --path DIR] [--stream] [--config PATH]")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("solo").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeFlags {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> ServeFlags {
    let mut flags = ServeFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    flags.host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    flags.port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    flags
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunFlags {
    pub prompt: String,
    pub project: Option<String>,
    pub path: Option<String>,
    pub stream: bool,
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

pub(crate) fn parse_run_flags(args: &[String], start: usize) -> RunFlags {
    let mut flags = RunFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--prompt" | "-p" => {
                if i + 1 < args.len() {
                    flags.prompt = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--project" => {
                if i + 1 < args.len() {
                    flags.project = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--path" => {
                if i + 1 < args.len() {
                    flags.path = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--stream" | "-s" => {
                flags.stream = true;
                i += 1;
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    flags
}

/// Value of `--config` anywhere after the command name.
fn config_flag(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .skip(2)
        .position(|a| a == "--config" || a == "-c")
        .and_then(|pos| args.get(pos + 3))
        .map(PathBuf::from)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "serve" => serve::run_serve(parse_serve_flags(&args, 2)).await,
        "run" => {
            let flags = parse_run_flags(&args, 2);
            if flags.prompt.trim().is_empty() {
                print_error("Error: --prompt is required for run mode.");
                print_help();
                return Ok(());
            }
            run::run_task(flags).await
        }
        "doctor" => doctor::run_doctor(config_flag(&args).as_deref()).await,
        "token" => {
            tokens::run_token_command();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            Ok(())
        }
    }
}
