use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use cph::cases::{CaseManager, TestCase};
use cph::compiler::{CompileResult, Compiler};
use cph::config::{CaseFile, CliArgs};
use cph::create_timestamp;
use cph::events::{Event, EventSink};

#[derive(Serialize)]
struct Report {
    source: String,
    finished_time: String,
    compile: CompileResult,
    passed: usize,
    total: usize,
    cases: Vec<CaseReport>,
}

#[derive(Serialize)]
struct CaseReport {
    verdict: Option<String>,
    #[serde(flatten)]
    case: TestCase,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let prefs = cli.to_preferences().context("Failed to load preferences")?;

    let (events, event_rx) = EventSink::channel();
    let display_task = tokio::spawn(display(event_rx, cli.json));

    let manager = Arc::new(CaseManager::new(events.clone()));
    let compiler = Compiler::new(events);

    if !cli.compile_only {
        let cases_path = cli.cases_path();
        let case_file = CaseFile::load(&cases_path).with_context(|| {
            format!("Failed to load test cases from {}", cases_path.display())
        })?;
        for case in case_file.tests {
            manager.add_case(case.input, case.output);
        }
        log::info!("Loaded {} test case(s)", manager.ids().len());
    }

    // ======= COMPILE =======

    let compile = manager
        .compile(&compiler, &cli.source, &prefs)
        .await
        .with_context(|| format!("Cannot compile {}", cli.source.display()))?;

    // ======= RUN =======

    if compile.success && !cli.compile_only {
        tokio::select! {
            _ = manager.run_all() => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-c received, stopping running cases...");
                manager.stop_all();
            }
        }
    }

    let cases = manager.cases();
    let passed = cases
        .iter()
        .filter(|case| case.result.as_ref().is_some_and(|r| r.pass()))
        .count();
    let total = cases.len();
    let all_passed = compile.success && passed == total;

    let report = Report {
        source: cli.source.display().to_string(),
        finished_time: create_timestamp(),
        compile,
        passed,
        total,
        cases: cases
            .into_iter()
            .map(|case| CaseReport {
                verdict: case.result.as_ref().map(|r| r.verdict().to_string()),
                case,
            })
            .collect(),
    };

    // Close the event channel so the display task drains and exits
    drop(compiler);
    drop(manager);
    if let Err(e) = display_task.await {
        log::error!("Display task failed: {e:?}");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(if all_passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Command line display surface: renders events as they arrive
async fn display(mut events: UnboundedReceiver<Event>, quiet: bool) {
    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event {
            Event::CompilingStart => eprintln!("Compiling..."),
            Event::CompilingStop => eprintln!("Compilation finished"),
            Event::CompileDiagnostics { diagnostics } => eprintln!("{diagnostics}"),
            Event::NotRunning => {}
            Event::CaseRunning { id } => log::debug!("Case {id} running"),
            Event::CaseResult { id, result } => {
                let time = if result.timed_out {
                    "timed out".to_string()
                } else {
                    format!("{}ms", result.elapsed_ms)
                };
                eprintln!("Case {id}: {} ({time})", result.verdict());
            }
            Event::CaseNotRunning { id } => eprintln!("Case {id}: stopped"),
        }
    }
}

fn print_summary(report: &Report) {
    if !report.compile.success {
        println!("Compilation failed");
        return;
    }

    for (num, entry) in report.cases.iter().enumerate() {
        let case = &entry.case;
        let Some(result) = &case.result else {
            println!("Testcase {}: not run", num + 1);
            continue;
        };
        if result.pass() {
            println!("Testcase {}: Accepted ({}ms)", num + 1, result.elapsed_ms);
            continue;
        }

        println!("Testcase {}: {}", num + 1, result.verdict());
        print_block("Input", &case.input);
        print_block("Expected Output", &case.expected_output);
        match &result.exit_signal {
            Some(signal) => println!("  Received: {signal}"),
            None => print_block("Received Output", &result.stdout),
        }
        if !result.stderr.trim().is_empty() {
            print_block("Standard Error", &result.stderr);
        }
    }

    println!("{}/{} passed", report.passed, report.total);
}

fn print_block(title: &str, text: &str) {
    println!("  {title}:");
    for line in text.trim().lines() {
        println!("    {line}");
    }
}
