// Terminal output helpers for CLI commands
//
// Progress goes to stderr so stdout stays clean for `--json` and tables.

use verigate_service::cache::CacheStatus;
use verigate_service::execution::sequencer::StepStatus;

/// Print a right-aligned status verb: "  Validating workflow.yml"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Tag for lines belonging to one configuration
fn tag(configuration: &str) -> String {
    format!("\x1b[1;34m[{}]\x1b[0m", configuration)
}

/// Print a line from a configuration's step
pub fn step_line(configuration: &str, message: &str) {
    eprintln!("{} {}", tag(configuration), message);
}

/// Print child process output, red for stderr
pub fn step_output(configuration: &str, line: &str, is_error: bool) {
    if is_error {
        eprintln!("{} \x1b[31m| {}\x1b[0m", tag(configuration), line);
    } else {
        eprintln!("{} \x1b[2m| {}\x1b[0m", tag(configuration), line);
    }
}

/// Short label for a step outcome
pub fn step_status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => "\x1b[32mOK\x1b[0m",
        StepStatus::Failed => "\x1b[31mFAIL\x1b[0m",
        StepStatus::Skipped => "\x1b[33mSKIP\x1b[0m",
        StepStatus::Cancelled => "\x1b[2mCANCELLED\x1b[0m",
    }
}

pub fn cache_status_label(status: CacheStatus) -> &'static str {
    match status {
        CacheStatus::Hit => "hit",
        CacheStatus::Miss => "miss",
        CacheStatus::Unavailable => "unavailable",
        CacheStatus::Disabled => "disabled",
    }
}
