// signaler CLI: run a batch audit from a JSON configuration file.
//
// Exit status: 0 on run completion, 2 when fail-on-budget mode is on and a
// budget is violated, 1 for operational failures (invalid config,
// unreachable base URL, fatal orchestration error).

use std::process::ExitCode;
use std::sync::Arc;

use signaler::{AuditConfig, AuditOrchestrator, NdjsonProgress, default_registry, evaluate_budgets};

fn usage() -> ! {
    eprintln!("usage: signaler [--progress] [--fail-on-budget] <config.json>");
    std::process::exit(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let mut config_path: Option<String> = None;
    let mut stream_progress = false;
    let mut fail_on_budget = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--progress" => stream_progress = true,
            "--fail-on-budget" => fail_on_budget = true,
            "-h" | "--help" => usage(),
            other if other.starts_with('-') => {
                eprintln!("unknown flag {other}");
                usage()
            }
            other => config_path = Some(other.to_string()),
        }
    }
    let Some(config_path) = config_path else { usage() };

    let raw = match std::fs::read_to_string(&config_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to read {config_path}: {e}");
            return ExitCode::from(1);
        }
    };
    let mut config: AuditConfig = match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    if fail_on_budget {
        config.fail_on_budget = true;
    }

    let registry = match default_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("plugin registration failed: {e}");
            return ExitCode::from(1);
        }
    };

    let orchestrator = match AuditOrchestrator::new(config.clone(), registry) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("audit setup failed: {e}");
            return ExitCode::from(1);
        }
    };
    let orchestrator = if stream_progress {
        orchestrator.with_progress(Arc::new(NdjsonProgress::new(std::io::stdout())))
    } else {
        orchestrator
    };

    // Ctrl-C cancels cooperatively; partial results are still written
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancellation requested, draining in-flight targets");
            cancel.cancel();
        }
    });

    match orchestrator.run().await {
        Ok(summary) => {
            eprintln!(
                "audit complete: {} target(s), status {:?}, artifacts in {}",
                summary.targets.len(),
                summary.meta.status,
                config.output_dir.display()
            );
            if config.fail_on_budget {
                let violations = evaluate_budgets(&summary, &config.budgets);
                if !violations.is_empty() {
                    for violation in &violations {
                        eprintln!(
                            "budget violated: {} {} (limit {}, actual {})",
                            violation.target_ref,
                            violation.budget,
                            violation.limit,
                            violation.actual
                        );
                    }
                    return ExitCode::from(2);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("audit failed: {e}");
            ExitCode::from(1)
        }
    }
}
