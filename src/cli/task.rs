//! Task commands: add, list, edit, toggle, rm.

use serde::Serialize;

use crate::cli::Context;
use crate::error::{Error, Result};
use crate::output::{emit_success, format_task_line, Report};
use crate::record::{NewTask, TaskPatch, TaskRecord};
use crate::view::{SortDirection, SortKey, StatusFilter, ViewState};

pub struct ListOptions {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    pub search: Option<String>,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    view: ViewState,
    tasks: Vec<TaskRecord>,
}

#[derive(Serialize)]
struct RemovedOutput {
    id: String,
    title: String,
}

fn parse_flag<T>(flag: &str, raw: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|err| Error::InvalidArgument(format!("--{flag}: {err}")))
    })
    .transpose()
}

fn task_report(title: &str, record: &TaskRecord) -> Report {
    let mut report = Report::new(title);
    report.field("id", record.id.clone()).field("title", record.title.clone());
    if let Some(description) = &record.description {
        report.field("description", description.clone());
    }
    report.field(
        "status",
        if record.completed { "completed" } else { "active" },
    );
    report
}

pub async fn add(ctx: &Context, title: String, description: Option<String>) -> Result<()> {
    let client = ctx.client().await?;
    let task = NewTask { title, description };
    let record = client.create(task).await?;

    let mut report = task_report("Added task", &record);
    report.hint(format!("tasksync toggle {}", short_id(&record.id)));
    emit_success(ctx.options, "add", &record, &report)
}

pub async fn list(ctx: &Context, options: ListOptions) -> Result<()> {
    let mut view = ctx.config.view.view_state()?;
    if let Some(filter) = parse_flag::<StatusFilter>("filter", options.filter.as_deref())? {
        view.filter = filter;
    }
    if let Some(sort) = parse_flag::<SortKey>("sort", options.sort.as_deref())? {
        view.sort = sort;
    }
    if let Some(direction) = parse_flag::<SortDirection>("direction", options.direction.as_deref())? {
        view.direction = direction;
    }
    if let Some(search) = options.search {
        view.search = search;
    }

    let client = ctx.client().await?;
    let tasks = client.projected(&view);

    let mut report = Report::new("Tasks");
    report.field("total", tasks.len().to_string());
    if view.filter != StatusFilter::All {
        report.field("filter", view.filter.to_string());
    }
    if !view.search.trim().is_empty() {
        report.field("search", view.search.trim().to_string());
    }
    for task in &tasks {
        report.row(format_task_line(task));
    }
    if tasks.is_empty() && client.records().is_empty() {
        report.hint("tasksync add \"<title>\"");
    }

    let output = TaskListOutput {
        total: tasks.len(),
        view,
        tasks,
    };
    emit_success(ctx.options, "list", &output, &report)
}

pub async fn edit(
    ctx: &Context,
    id: String,
    title: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let client = ctx.client().await?;
    let id = client.resolve_id(&id)?;
    let patch = TaskPatch {
        title,
        description,
        completed: None,
    };
    let record = client.update(&id, patch).await?;

    emit_success(ctx.options, "edit", &record, &task_report("Updated task", &record))
}

pub async fn toggle(ctx: &Context, id: String) -> Result<()> {
    let client = ctx.client().await?;
    let id = client.resolve_id(&id)?;
    let record = client.toggle_complete(&id).await?;

    let header = if record.completed {
        "Completed task"
    } else {
        "Reopened task"
    };
    emit_success(ctx.options, "toggle", &record, &task_report(header, &record))
}

pub async fn remove(ctx: &Context, id: String) -> Result<()> {
    let client = ctx.client().await?;
    let id = client.resolve_id(&id)?;
    let title = client
        .get(&id)
        .map(|record| record.title)
        .unwrap_or_default();
    client.delete(&id).await?;

    let mut report = Report::new("Removed task");
    report.field("id", id.clone()).field("title", title.clone());
    emit_success(ctx.options, "rm", &RemovedOutput { id, title }, &report)
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
