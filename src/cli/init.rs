//! tasksync init command implementation
//!
//! Creates the data directory, an empty task file and a default config.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::{emit_success, OutputOptions, Report};
use crate::storage::Storage;

#[derive(serde::Serialize)]
struct InitReport {
    data_dir: PathBuf,
    created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    owner_saved: bool,
}

pub fn run(data_dir: PathBuf, owner: Option<String>, options: OutputOptions) -> Result<()> {
    if data_dir.exists() && !data_dir.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "data dir exists but is not a directory: {}",
            data_dir.display()
        )));
    }

    let storage = Storage::new(&data_dir);
    let created = storage.init()?;

    let mut config = Config::load(&storage.config_file())?;
    let owner = owner
        .map(|owner| owner.trim().to_string())
        .filter(|owner| !owner.is_empty());
    let owner_saved = match &owner {
        Some(owner) if config.owner.as_deref() != Some(owner.as_str()) => {
            config.owner = Some(owner.clone());
            config.save(&storage.config_file())?;
            true
        }
        _ => false,
    };

    let report = InitReport {
        data_dir: data_dir.clone(),
        created,
        owner: config.owner.clone(),
        owner_saved,
    };

    let header = if created || owner_saved {
        "tasksync init: ready"
    } else {
        "tasksync init: nothing to do"
    };
    let mut human = Report::new(header);
    human.field("data dir", data_dir.display().to_string()).field(
        "owner",
        config.owner.clone().unwrap_or_else(|| "unset".to_string()),
    );
    if config.owner.is_none() {
        human.hint("tasksync init --owner <id>");
    }
    human.hint("tasksync add \"Buy milk\"");

    emit_success(options, "init", &report, &human)
}
