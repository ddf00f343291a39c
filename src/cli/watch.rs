//! tasksync watch: follow live changes until Ctrl-C.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::cli::Context;
use crate::error::{Error, Result};
use crate::listener::ConnectionState;
use crate::local::diff_snapshots;
use crate::notice::{Notice, NoticeDestination, NoticeSink};
use crate::output::format_task_line;
use crate::record::TaskRecord;
use crate::service::{ChangeEvent, ChangeKind};
use crate::store;

const REFRESH_MS: u64 = 200;

type Snapshot = BTreeMap<String, TaskRecord>;

pub async fn run(ctx: &Context, notices: Option<String>) -> Result<()> {
    let mut sink = NoticeDestination::parse(notices.as_deref())
        .map(|destination| destination.open())
        .transpose()?;

    let client = ctx.client().await?;
    let mut notice_rx = client.subscribe_notices();
    let handle = client.listen();
    let mut state_rx = handle.watch_state();

    let mut shown = snapshot(&client.records());
    let mut revision = store::lock(client.store()).revision();
    if !ctx.options.json && !ctx.options.quiet {
        println!("Watching tasks for {} (Ctrl-C to stop)", ctx.owner);
        for record in shown.values() {
            println!("  {}", format_task_line(record));
        }
    }

    let mut refresh = tokio::time::interval(Duration::from_millis(REFRESH_MS));
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = state_rx.changed() => {
                if changed.is_err() || *state_rx.borrow() == ConnectionState::Stopped {
                    break Err(Error::OperationFailed("live updates stopped".to_string()));
                }
            }
            notice = notice_rx.recv() => match notice {
                Ok(notice) => report_notice(ctx, sink.as_mut(), &notice)?,
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "notice receiver lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = refresh.tick() => {
                let current = store::lock(client.store()).revision();
                if current != revision {
                    revision = current;
                    let next = snapshot(&client.records());
                    for event in diff_snapshots(&shown, &next)? {
                        print_change(ctx, &event, &shown)?;
                    }
                    shown = next;
                }
            }
        }
    };

    handle.shutdown().await;
    client.logout();
    outcome
}

fn snapshot(records: &[TaskRecord]) -> Snapshot {
    records
        .iter()
        .filter(|record| !record.is_temporary())
        .map(|record| (record.id.clone(), record.clone()))
        .collect()
}

fn report_notice(ctx: &Context, sink: Option<&mut NoticeSink>, notice: &Notice) -> Result<()> {
    match sink {
        Some(sink) => sink.emit(notice),
        None => {
            if !ctx.options.quiet {
                eprintln!("notice: {}", notice.message);
            }
            Ok(())
        }
    }
}

fn print_change(ctx: &Context, event: &ChangeEvent, before: &Snapshot) -> Result<()> {
    if ctx.options.json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    if ctx.options.quiet {
        return Ok(());
    }
    match event.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let record = TaskRecord::from_value(&event.payload)?;
            let mark = if event.kind == ChangeKind::Insert { "+" } else { "~" };
            println!("{mark} {}", format_task_line(&record));
        }
        ChangeKind::Delete => {
            let id = crate::record::parse_id(&event.payload)?;
            match before.get(&id) {
                Some(record) => println!("- {}", format_task_line(record)),
                None => println!("- {id}"),
            }
        }
    }
    Ok(())
}
