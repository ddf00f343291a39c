//! Rendering of command results: a JSON envelope for scripts, plain text for
//! people.

use serde::Serialize;

use crate::error::{exit_codes, Error, Result};
use crate::record::TaskRecord;

pub const SCHEMA_VERSION: &str = "tasksync.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Plain-text rendering of one command's result.
#[derive(Debug, Clone, Default)]
pub struct Report {
    title: String,
    fields: Vec<(&'static str, String)>,
    rows: Vec<String>,
    hints: Vec<String>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn field(&mut self, label: &'static str, value: impl Into<String>) -> &mut Self {
        self.fields.push((label, value.into()));
        self
    }

    pub fn row(&mut self, line: impl Into<String>) -> &mut Self {
        self.rows.push(line.into());
        self
    }

    /// A command worth running next.
    pub fn hint(&mut self, command: impl Into<String>) -> &mut Self {
        self.hints.push(command.into());
        self
    }

    pub fn render(&self) -> String {
        let width = self
            .fields
            .iter()
            .map(|(label, _)| label.len())
            .max()
            .unwrap_or(0);

        let mut out = self.title.clone();
        for (label, value) in &self.fields {
            out.push_str(&format!("\n  {label:<width$}  {value}"));
        }
        if !self.rows.is_empty() {
            out.push('\n');
            for row in &self.rows {
                out.push_str(&format!("\n  {row}"));
            }
        }
        if !self.hints.is_empty() {
            out.push('\n');
            for hint in &self.hints {
                out.push_str(&format!("\nhint: {hint}"));
            }
        }
        out
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// `{schema_version, command, status, data|error, next_steps?}`
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    report: &Report,
) -> Result<()> {
    if options.json {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data: Some(data),
            error: None,
            next_steps: report.hints.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else if !options.quiet {
        println!("{}", report.render());
    }
    Ok(())
}

/// Errors go to stdout as an envelope in JSON mode, else to stderr.
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let hints = error_hints(err);
    if !json {
        eprintln!("error: {err}");
        for hint in &hints {
            eprintln!("hint: {hint}");
        }
        return Ok(());
    }

    let envelope: Envelope<'_, ()> = Envelope {
        schema_version: SCHEMA_VERSION,
        command,
        status: "error",
        data: None,
        error: Some(ErrorBody {
            message: err.to_string(),
            code: err.exit_code(),
            kind: error_kind(err),
            retryable: err.is_retryable(),
            details: err.details(),
        }),
        next_steps: hints,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// One list row: `[x] 01hx3k7a  Buy milk`.
pub fn format_task_line(record: &TaskRecord) -> String {
    let mark = if record.completed { "x" } else { " " };
    let short: String = record.id.chars().take(8).collect();
    match &record.description {
        Some(description) => format!("[{mark}] {short}  {}  ({description})", record.title),
        None => format!("[{mark}] {short}  {}", record.title),
    }
}

/// Subcommand name from the raw arguments, for errors raised before clap
/// finishes parsing.
pub fn infer_command_name_from_args() -> String {
    infer_command_name(std::env::args().skip(1))
}

fn infer_command_name(mut args: impl Iterator<Item = String>) -> String {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-dir" | "--owner" => {
                args.next();
            }
            flag if flag.starts_with('-') => {}
            _ => return arg,
        }
    }
    "tasksync".to_string()
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        exit_codes::USER_ERROR => "user_error",
        exit_codes::AUTH_REQUIRED => "auth_required",
        _ => "operation_failed",
    }
}

fn error_hints(err: &Error) -> Vec<String> {
    let hint = match err.cause() {
        Error::Auth(_) => "tasksync --owner <id> <command>",
        Error::NotFound(_) => "tasksync list",
        Error::InvalidConfig(_) => "fix tasksync.toml then retry",
        Error::Busy(_) => "wait for the pending change, then retry",
        Error::LockFailed(_) => "another tasksync process is writing; retry",
        other if other.is_retryable() => "retry the command",
        _ => return Vec::new(),
    };
    vec![hint.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> impl Iterator<Item = String> {
        raw.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn command_name_skips_global_flag_values() {
        assert_eq!(
            infer_command_name(args(&["--owner", "alice", "--json", "add", "x"])),
            "add"
        );
        assert_eq!(infer_command_name(args(&["--json"])), "tasksync");
    }

    #[test]
    fn report_aligns_fields_and_lists_hints() {
        let mut report = Report::new("Added task");
        report
            .field("id", "01hx")
            .field("title", "Buy milk")
            .hint("tasksync list");
        assert_eq!(
            report.render(),
            "Added task\n  id     01hx\n  title  Buy milk\n\nhint: tasksync list"
        );
    }

    #[test]
    fn report_rows_follow_fields() {
        let mut report = Report::new("Tasks");
        report.field("total", "1").row("[ ] 01hx  Buy milk");
        assert_eq!(report.render(), "Tasks\n  total  1\n\n  [ ] 01hx  Buy milk");
    }

    #[test]
    fn auth_errors_suggest_owner_flag() {
        let err = Error::mutation(
            crate::error::MutationKind::Create,
            "new",
            Error::Auth("expired".to_string()),
        );
        assert_eq!(error_kind(&err), "auth_required");
        assert_eq!(error_hints(&err), vec!["tasksync --owner <id> <command>"]);
    }

    #[test]
    fn task_line_marks_completion() {
        let record = TaskRecord {
            id: "01hx3k7a9z".to_string(),
            title: "Buy milk".to_string(),
            description: Some("2%".to_string()),
            completed: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            owner_id: "alice".to_string(),
        };
        assert_eq!(format_task_line(&record), "[x] 01hx3k7a  Buy milk  (2%)");
    }
}
