//! Invocation model: what an envelope asks a capability to do.
//!
//! Standard operations are a closed set; anything else must go through the
//! named-method path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::envelope::{Payload, ResourceId};
use super::errors::QueueError;

/// Standard capability operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Get,
    Find,
    Patch,
    Remove,
    Update,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Get => "get",
            Action::Find => "find",
            Action::Patch => "patch",
            Action::Remove => "remove",
            Action::Update => "update",
        }
    }

    /// Does this operation address a single resource?
    pub fn requires_id(self) -> bool {
        matches!(
            self,
            Action::Get | Action::Patch | Action::Remove | Action::Update
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "get" => Ok(Action::Get),
            "find" => Ok(Action::Find),
            "patch" => Ok(Action::Patch),
            "remove" => Ok(Action::Remove),
            "update" => Ok(Action::Update),
            other => Err(QueueError::InvalidAction(other.to_string())),
        }
    }
}

/// A resolved call, ready to be executed against a capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Create {
        data: serde_json::Value,
        params: Option<serde_json::Value>,
    },
    Get {
        id: ResourceId,
        params: Option<serde_json::Value>,
    },
    /// `params` already carries the payload `query` merged in.
    Find { params: serde_json::Value },
    Patch {
        id: ResourceId,
        data: serde_json::Value,
        params: Option<serde_json::Value>,
    },
    Remove {
        id: ResourceId,
        params: Option<serde_json::Value>,
    },
    Update {
        id: ResourceId,
        data: serde_json::Value,
        params: Option<serde_json::Value>,
    },
    Method {
        name: String,
        args: Vec<serde_json::Value>,
    },
}

impl Invocation {
    /// Resolve a payload into an invocation.
    ///
    /// `method` takes precedence over `action`.
    pub fn from_payload(payload: &Payload) -> Result<Self, QueueError> {
        if let Some(name) = &payload.method {
            return Ok(Invocation::Method {
                name: name.clone(),
                args: payload.method_args.clone().unwrap_or_default(),
            });
        }

        let action: Action = payload.action.as_deref().unwrap_or_default().parse()?;
        let data = payload.data.clone();
        let params = payload.params.clone();

        let id = if action.requires_id() {
            Some(payload.id.clone().ok_or(QueueError::MissingId(action))?)
        } else {
            None
        };

        Ok(match (action, id) {
            (Action::Create, _) => Invocation::Create { data, params },
            (Action::Find, _) => Invocation::Find {
                params: merge_query(params, payload.query.clone()),
            },
            (Action::Get, Some(id)) => Invocation::Get { id, params },
            (Action::Patch, Some(id)) => Invocation::Patch { id, data, params },
            (Action::Remove, Some(id)) => Invocation::Remove { id, params },
            (Action::Update, Some(id)) => Invocation::Update { id, data, params },
            (action, None) => return Err(QueueError::MissingId(action)),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Invocation::Create { .. } => Action::Create.as_str(),
            Invocation::Get { .. } => Action::Get.as_str(),
            Invocation::Find { .. } => Action::Find.as_str(),
            Invocation::Patch { .. } => Action::Patch.as_str(),
            Invocation::Remove { .. } => Action::Remove.as_str(),
            Invocation::Update { .. } => Action::Update.as_str(),
            Invocation::Method { name, .. } => name,
        }
    }
}

/// `{ ...params, query }`
fn merge_query(
    params: Option<serde_json::Value>,
    query: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut merged = match params {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    if let Some(query) = query {
        merged.insert("query".to_string(), query);
    }
    serde_json::Value::Object(merged)
}
