use gumdrop::Options;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use stampede::config::{Configuration, OutputFormat};
use stampede::{LoadTest, EXIT_ERROR};

fn initialize_logger(log_level: u8) {
    let level = match log_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto).is_err() {
        eprintln!("failed to initialize logger");
    }
}

#[tokio::main]
async fn main() {
    let arguments: Vec<String> = std::env::args().skip(1).collect();
    let configuration = match Configuration::parse_args_default(&arguments) {
        Ok(configuration) => configuration,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("{}", Configuration::usage());
            std::process::exit(EXIT_ERROR);
        }
    };

    if configuration.help {
        println!("{}", Configuration::usage());
        return;
    }
    if configuration.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }

    initialize_logger(configuration.log_level);

    let output = configuration.output;
    let load_test = match LoadTest::new(configuration) {
        Ok(load_test) => load_test,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(EXIT_ERROR);
        }
    };

    let summary = match load_test.execute().await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(EXIT_ERROR);
        }
    };

    let mut stdout = std::io::stdout();
    if let Err(e) = summary.write(&mut stdout, output) {
        eprintln!("error writing results: {}", e);
        std::process::exit(EXIT_ERROR);
    }

    let exit_code = summary.exit_code();
    if exit_code != 0 && output == OutputFormat::Text {
        eprintln!("\nThreshold check failed!");
    }
    std::process::exit(exit_code);
}
