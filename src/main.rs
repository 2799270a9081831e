use azure_network_topology::cancel::Cancel;
use azure_network_topology::cli::Cli;
use azure_network_topology::orchestrator::Orchestrator;
use clap::Parser;
use colored::Colorize;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::process::ExitCode;

/// Console logging used when there is no `log4rs.yml` next to the binary.
fn init_console_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let stderr = ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("{} initializing log4rs: {e}", "ERROR".on_red());
            }
        }
        Err(e) => eprintln!("{} building log4rs config: {e}", "ERROR".on_red()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Do as little as possible in main.rs as it can't contain any tests
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        if std::path::Path::new("log4rs.yml").exists() {
            eprintln!("{} log4rs.yml: {e}, logging to the console", "ERROR".on_red());
        }
        init_console_logging(cli.global.verbose);
    }
    log::info!("#Start main()");

    let settings = match cli.global.into_settings() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{} {err}", "ERROR".on_red());
            return ExitCode::from(err.exit_code());
        }
    };

    let cancel = Cancel::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    match Orchestrator::new(settings, cancel).run(&cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("{} {err}", "ERROR".on_red());
            ExitCode::from(err.exit_code())
        }
    }
}
