//! Task records and the inputs that create or change them.
//!
//! Payloads coming back from a service are loosely typed; [`TaskRecord::from_value`]
//! coerces them into the strict shape before anything else sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;
pub const TEMP_ID_PREFIX: &str = "tmp-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(alias = "user_id")]
    pub owner_id: String,
}

impl TaskRecord {
    /// Build the locally assumed record shown while a create is in flight.
    pub fn optimistic(owner_id: &str, task: &NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: temp_id(),
            title: task.title.clone(),
            description: task.description.clone(),
            completed: false,
            created_at: now,
            updated_at: now,
            owner_id: owner_id.to_string(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        is_temp_id(&self.id)
    }

    /// Apply a validated patch without touching timestamps; the service owns those.
    pub fn patched(&self, patch: &TaskPatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(description) = &patch.description {
            next.description = if description.is_empty() {
                None
            } else {
                Some(description.clone())
            };
        }
        if let Some(completed) = patch.completed {
            next.completed = completed;
        }
        next
    }

    /// Coerce a loosely typed service payload into a record.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::Payload(format!("expected an object, got {}", kind_of(value))))?;

        let id = object
            .get("id")
            .map(parse_id)
            .transpose()?
            .ok_or_else(|| Error::Payload("missing id".to_string()))?;

        let title = match object.get("title") {
            Some(Value::String(title)) => title.trim().to_string(),
            Some(other) => {
                return Err(Error::Payload(format!(
                    "title of {id} must be a string, got {}",
                    kind_of(other)
                )))
            }
            None => return Err(Error::Payload(format!("missing title for {id}"))),
        };
        if title.is_empty() {
            return Err(Error::Payload(format!("empty title for {id}")));
        }
        check_length(&title, TITLE_MAX_CHARS, "title", &id)?;

        let description = match object.get("description") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => {
                let trimmed = text.trim();
                check_length(trimmed, DESCRIPTION_MAX_CHARS, "description", &id)?;
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Some(other) => {
                return Err(Error::Payload(format!(
                    "description of {id} must be a string, got {}",
                    kind_of(other)
                )))
            }
        };

        let completed = match object.get("completed") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(Error::Payload(format!(
                    "completed of {id} must be a boolean, got {}",
                    kind_of(other)
                )))
            }
        };

        let created_at = parse_timestamp(object.get("created_at"), "created_at", &id)?
            .ok_or_else(|| Error::Payload(format!("missing created_at for {id}")))?;
        let updated_at =
            parse_timestamp(object.get("updated_at"), "updated_at", &id)?.unwrap_or(created_at);

        let owner_id = object
            .get("owner_id")
            .or_else(|| object.get("user_id"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .ok_or_else(|| Error::Payload(format!("missing owner_id for {id}")))?
            .to_string();

        Ok(Self {
            id,
            title,
            description,
            completed,
            created_at,
            updated_at,
            owner_id,
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn check_length(text: &str, max: usize, field: &str, id: &str) -> Result<()> {
    let len = text.chars().count();
    if len > max {
        return Err(Error::Payload(format!(
            "{field} of {id} has {len} characters, limit is {max}"
        )));
    }
    Ok(())
}

/// Input for `create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Trim and check bounds, returning the normalized input.
    pub fn validate(&self) -> Result<NewTask> {
        let title = validate_title(&self.title)?;
        let description = match self.description.as_deref() {
            Some(text) => validate_description(text)?,
            None => None,
        };
        Ok(NewTask { title, description })
    }
}

/// Partial update. An empty description clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.completed.is_none()
    }

    pub fn validate(&self) -> Result<TaskPatch> {
        if self.is_empty() {
            return Err(Error::validation("patch", "no fields to update"));
        }
        let title = self.title.as_deref().map(validate_title).transpose()?;
        let description = match self.description.as_deref() {
            Some(text) => Some(validate_description(text)?.unwrap_or_default()),
            None => None,
        };
        Ok(TaskPatch {
            title,
            description,
            completed: self.completed,
        })
    }
}

pub fn validate_title(raw: &str) -> Result<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(Error::validation("title", "cannot be empty"));
    }
    let len = title.chars().count();
    if len > TITLE_MAX_CHARS {
        return Err(Error::validation(
            "title",
            format!("{len} characters exceeds the limit of {TITLE_MAX_CHARS}"),
        ));
    }
    Ok(title.to_string())
}

pub fn validate_description(raw: &str) -> Result<Option<String>> {
    let description = raw.trim();
    let len = description.chars().count();
    if len > DESCRIPTION_MAX_CHARS {
        return Err(Error::validation(
            "description",
            format!("{len} characters exceeds the limit of {DESCRIPTION_MAX_CHARS}"),
        ));
    }
    if description.is_empty() {
        Ok(None)
    } else {
        Ok(Some(description.to_string()))
    }
}

pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Identifiers arrive as strings or integers depending on the backend.
pub fn parse_id(value: &Value) -> Result<String> {
    let id = match value {
        Value::String(id) => id.trim().to_string(),
        Value::Number(number) if number.is_u64() || number.is_i64() => number.to_string(),
        Value::Object(object) => match object.get("id") {
            Some(inner) if !inner.is_object() => return parse_id(inner),
            _ => return Err(Error::Payload("object without a usable id".to_string())),
        },
        other => {
            return Err(Error::Payload(format!(
                "id must be a string or integer, got {}",
                kind_of(other)
            )))
        }
    };
    if id.is_empty() {
        return Err(Error::Payload("empty id".to_string()));
    }
    Ok(id)
}

fn parse_timestamp(value: Option<&Value>, field: &str, id: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|err| Error::Payload(format!("{field} of {id}: {err}"))),
        Some(other) => Err(Error::Payload(format!(
            "{field} of {id} must be an RFC 3339 string, got {}",
            kind_of(other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
