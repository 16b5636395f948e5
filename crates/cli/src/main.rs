use std::time::Duration;
use std::{fs, process, thread};

use clap::Parser;
use isocop_cli::{App, Command, FmtArgs, RunArgs, ShowArgs};
use isocop_core::scenario::{builtin, display};
use isocop_core::{CancelToken, ScenarioReport, Verdict};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let app = App::parse();
    match &app.command {
        Command::List => list(),
        Command::Show(args) => show(args),
        Command::Run(args) => run(args),
        Command::Fmt(args) => fmt(args),
        Command::Schema => schema(),
    }
}

fn list() {
    for scenario in builtin::all() {
        println!("{:<20} {}", scenario.name(), scenario.description());
    }
}

fn show(args: &ShowArgs) {
    let Some(scenario) = builtin::find(&args.name) else {
        eprintln!("Unknown scenario `{}`; try `isocop list`", args.name);
        process::exit(1);
    };
    print!("{}", display::format_scenario(&scenario));
}

fn run(args: &RunArgs) {
    let scenarios = isocop_cli::select_scenarios(args).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    let cancel = CancelToken::new();
    if let Some(ms) = args.cancel_after_ms {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            tracing::warn!(after_ms = ms, "cancelling runs");
            cancel.cancel();
        });
    }

    let reports = isocop_cli::run_reports(args, &scenarios, &cancel).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    for report in &reports {
        if args.json {
            print_json(report);
        } else {
            println!("{}", isocop_cli::render_report(report, args.verbose));
        }
    }

    if reports.iter().any(|r| r.verdict() == Verdict::EngineError) {
        process::exit(1);
    }
}

fn print_json(report: &ScenarioReport) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{line}"),
        Err(e) => {
            eprintln!("Failed to serialize report: {e}");
            process::exit(1);
        }
    }
}

fn fmt(args: &FmtArgs) {
    let files = isocop_cli::collect_scn_files(&args.paths).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });
    let mut unformatted = false;

    for path in files {
        let text = fs::read_to_string(&path).unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {e}", path.display());
            process::exit(1);
        });
        let formatted = isocop_cli::format_text(&text).unwrap_or_else(|e| {
            eprintln!("{}: {e}", path.display());
            process::exit(1);
        });
        if formatted == text {
            continue;
        }
        if args.check {
            println!("would reformat {}", path.display());
            unformatted = true;
        } else {
            fs::write(&path, formatted).unwrap_or_else(|e| {
                eprintln!("Failed to write {}: {e}", path.display());
                process::exit(1);
            });
            println!("formatted {}", path.display());
        }
    }

    if unformatted {
        process::exit(1);
    }
}

fn schema() {
    let schema = schemars::schema_for!(ScenarioReport);
    match serde_json::to_string_pretty(&schema) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Failed to render schema: {e}");
            process::exit(1);
        }
    }
}
