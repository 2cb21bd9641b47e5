//! The closed set of commands carried by operations.

use crate::clock::VectorClock;
use crate::error::{ProtocolError, ProtocolResult};
use crate::model::{ArchiveTask, CompleteSnapshot, TaskUpdate, TaskWithSubTasks, Timestamp};
use crate::operation::{OpType, Operation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entity type names used in operation metadata.
pub mod entity {
    /// Tasks, live or archived.
    pub const TASK: &str = "TASK";
    /// The archive as a whole.
    pub const ARCHIVE: &str = "ARCHIVE";
    /// Projects.
    pub const PROJECT: &str = "PROJECT";
    /// Tags.
    pub const TAG: &str = "TAG";
    /// Repeat configurations.
    pub const TASK_REPEAT_CFG: &str = "TASK_REPEAT_CFG";
    /// Issue providers.
    pub const ISSUE_PROVIDER: &str = "ISSUE_PROVIDER";
    /// Everything (full imports).
    pub const ALL: &str = "ALL";
}

/// Tasks (with subtasks) moved into the young archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveToArchive {
    /// The archived tasks.
    pub tasks: Vec<TaskWithSubTasks>,
}

/// An archived task brought back to the live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreTask {
    /// The restored parent task; its `subTaskIds` are restored with it.
    pub task: ArchiveTask,
}

/// Several task updates applied together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTasks {
    /// The updates.
    pub updates: Vec<TaskUpdate>,
}

/// Young-to-old flush performed at `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushYoungToOld {
    /// The flush time every client replays with.
    pub timestamp: Timestamp,
}

/// Archive compression with a fixed cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressArchive {
    /// Tasks completed before this time are compressed.
    pub one_year_ago_timestamp: Timestamp,
}

/// A deleted project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProject {
    /// Project id.
    pub project_id: String,
}

/// A deleted tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTag {
    /// Tag id.
    pub id: String,
}

/// Several deleted tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTags {
    /// Tag ids.
    pub ids: Vec<String>,
}

/// A deleted repeat configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskRepeatCfg {
    /// Repeat configuration id.
    pub task_repeat_cfg_id: String,
}

/// A deleted issue provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteIssueProvider {
    /// Issue provider id.
    pub issue_provider_id: String,
}

/// Several deleted issue providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteIssueProviders {
    /// Issue provider ids.
    pub ids: Vec<String>,
}

/// Full-state import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadAllData {
    /// The imported data.
    pub app_data_complete: CompleteSnapshot,
}

/// Every command an operation can carry.
///
/// The archive-affecting kinds are enumerated explicitly so dispatch on them
/// is exhaustive; everything else travels as [`Command::Other`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Tasks archived.
    MoveToArchive(MoveToArchive),
    /// Task restored from the archive.
    RestoreTask(RestoreTask),
    /// One task updated.
    UpdateTask(TaskUpdate),
    /// Several tasks updated.
    UpdateTasks(UpdateTasks),
    /// Young archive flushed into old.
    FlushYoungToOld(FlushYoungToOld),
    /// Archive compressed.
    CompressArchive(CompressArchive),
    /// Project deleted.
    DeleteProject(DeleteProject),
    /// Tag deleted.
    DeleteTag(DeleteTag),
    /// Tags deleted.
    DeleteTags(DeleteTags),
    /// Repeat configuration deleted.
    DeleteTaskRepeatCfg(DeleteTaskRepeatCfg),
    /// Issue provider deleted.
    DeleteIssueProvider(DeleteIssueProvider),
    /// Issue providers deleted.
    DeleteIssueProviders(DeleteIssueProviders),
    /// Full-state import.
    LoadAllData(LoadAllData),
    /// Any command that does not concern the archive.
    Other {
        /// Action type.
        action_type: String,
        /// Raw payload.
        payload: Value,
    },
}

/// Action type strings of the known commands.
pub mod action {
    /// [`super::Command::MoveToArchive`].
    pub const MOVE_TO_ARCHIVE: &str = "task/moveToArchive";
    /// [`super::Command::RestoreTask`].
    pub const RESTORE_TASK: &str = "task/restore";
    /// [`super::Command::UpdateTask`].
    pub const UPDATE_TASK: &str = "task/update";
    /// [`super::Command::UpdateTasks`].
    pub const UPDATE_TASKS: &str = "task/updateMany";
    /// [`super::Command::FlushYoungToOld`].
    pub const FLUSH_YOUNG_TO_OLD: &str = "archive/flushYoungToOld";
    /// [`super::Command::CompressArchive`].
    pub const COMPRESS_ARCHIVE: &str = "archive/compress";
    /// [`super::Command::DeleteProject`].
    pub const DELETE_PROJECT: &str = "project/delete";
    /// [`super::Command::DeleteTag`].
    pub const DELETE_TAG: &str = "tag/delete";
    /// [`super::Command::DeleteTags`].
    pub const DELETE_TAGS: &str = "tag/deleteMany";
    /// [`super::Command::DeleteTaskRepeatCfg`].
    pub const DELETE_TASK_REPEAT_CFG: &str = "repeatCfg/delete";
    /// [`super::Command::DeleteIssueProvider`].
    pub const DELETE_ISSUE_PROVIDER: &str = "issueProvider/delete";
    /// [`super::Command::DeleteIssueProviders`].
    pub const DELETE_ISSUE_PROVIDERS: &str = "issueProvider/deleteMany";
    /// [`super::Command::LoadAllData`].
    pub const LOAD_ALL_DATA: &str = "sync/loadAllData";
}

fn parse<T: DeserializeOwned>(action_type: &str, payload: &Value) -> ProtocolResult<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| ProtocolError::invalid_payload(action_type, e))
}

impl Command {
    /// Rebuilds a command from an action type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if a known action type
    /// carries a payload of the wrong shape.
    pub fn from_parts(action_type: &str, payload: &Value) -> ProtocolResult<Self> {
        let command = match action_type {
            action::MOVE_TO_ARCHIVE => Command::MoveToArchive(parse(action_type, payload)?),
            action::RESTORE_TASK => Command::RestoreTask(parse(action_type, payload)?),
            action::UPDATE_TASK => Command::UpdateTask(parse(action_type, payload)?),
            action::UPDATE_TASKS => Command::UpdateTasks(parse(action_type, payload)?),
            action::FLUSH_YOUNG_TO_OLD => Command::FlushYoungToOld(parse(action_type, payload)?),
            action::COMPRESS_ARCHIVE => Command::CompressArchive(parse(action_type, payload)?),
            action::DELETE_PROJECT => Command::DeleteProject(parse(action_type, payload)?),
            action::DELETE_TAG => Command::DeleteTag(parse(action_type, payload)?),
            action::DELETE_TAGS => Command::DeleteTags(parse(action_type, payload)?),
            action::DELETE_TASK_REPEAT_CFG => {
                Command::DeleteTaskRepeatCfg(parse(action_type, payload)?)
            }
            action::DELETE_ISSUE_PROVIDER => {
                Command::DeleteIssueProvider(parse(action_type, payload)?)
            }
            action::DELETE_ISSUE_PROVIDERS => {
                Command::DeleteIssueProviders(parse(action_type, payload)?)
            }
            action::LOAD_ALL_DATA => Command::LoadAllData(parse(action_type, payload)?),
            other => Command::Other {
                action_type: other.to_string(),
                payload: payload.clone(),
            },
        };
        Ok(command)
    }

    /// Rebuilds the command carried by `op`.
    ///
    /// # Errors
    ///
    /// See [`Command::from_parts`].
    pub fn from_operation(op: &Operation) -> ProtocolResult<Self> {
        Self::from_parts(&op.action_type, &op.payload)
    }

    /// The action type string.
    #[must_use]
    pub fn action_type(&self) -> &str {
        match self {
            Command::MoveToArchive(_) => action::MOVE_TO_ARCHIVE,
            Command::RestoreTask(_) => action::RESTORE_TASK,
            Command::UpdateTask(_) => action::UPDATE_TASK,
            Command::UpdateTasks(_) => action::UPDATE_TASKS,
            Command::FlushYoungToOld(_) => action::FLUSH_YOUNG_TO_OLD,
            Command::CompressArchive(_) => action::COMPRESS_ARCHIVE,
            Command::DeleteProject(_) => action::DELETE_PROJECT,
            Command::DeleteTag(_) => action::DELETE_TAG,
            Command::DeleteTags(_) => action::DELETE_TAGS,
            Command::DeleteTaskRepeatCfg(_) => action::DELETE_TASK_REPEAT_CFG,
            Command::DeleteIssueProvider(_) => action::DELETE_ISSUE_PROVIDER,
            Command::DeleteIssueProviders(_) => action::DELETE_ISSUE_PROVIDERS,
            Command::LoadAllData(_) => action::LOAD_ALL_DATA,
            Command::Other { action_type, .. } => action_type,
        }
    }

    /// Serializes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if the payload cannot be
    /// represented as JSON.
    pub fn payload(&self) -> ProtocolResult<Value> {
        let result = match self {
            Command::MoveToArchive(p) => serde_json::to_value(p),
            Command::RestoreTask(p) => serde_json::to_value(p),
            Command::UpdateTask(p) => serde_json::to_value(p),
            Command::UpdateTasks(p) => serde_json::to_value(p),
            Command::FlushYoungToOld(p) => serde_json::to_value(p),
            Command::CompressArchive(p) => serde_json::to_value(p),
            Command::DeleteProject(p) => serde_json::to_value(p),
            Command::DeleteTag(p) => serde_json::to_value(p),
            Command::DeleteTags(p) => serde_json::to_value(p),
            Command::DeleteTaskRepeatCfg(p) => serde_json::to_value(p),
            Command::DeleteIssueProvider(p) => serde_json::to_value(p),
            Command::DeleteIssueProviders(p) => serde_json::to_value(p),
            Command::LoadAllData(p) => serde_json::to_value(p),
            Command::Other { payload, .. } => Ok(payload.clone()),
        };
        result.map_err(|e| ProtocolError::invalid_payload(self.action_type(), e))
    }

    /// Returns true if replaying this command may change archive storage.
    #[must_use]
    pub fn is_archive_affecting(&self) -> bool {
        !matches!(self, Command::Other { .. })
    }

    /// Returns true for commands that replace all local data.
    #[must_use]
    pub fn is_full_import(&self) -> bool {
        matches!(self, Command::LoadAllData(_))
    }

    /// Kind of change this command represents.
    #[must_use]
    pub fn op_type(&self) -> OpType {
        match self {
            Command::RestoreTask(_) => OpType::Create,
            Command::DeleteProject(_)
            | Command::DeleteTag(_)
            | Command::DeleteTags(_)
            | Command::DeleteTaskRepeatCfg(_)
            | Command::DeleteIssueProvider(_)
            | Command::DeleteIssueProviders(_) => OpType::Delete,
            Command::MoveToArchive(_) | Command::UpdateTasks(_) => OpType::Batch,
            Command::LoadAllData(_) => OpType::SyncImport,
            Command::UpdateTask(_)
            | Command::FlushYoungToOld(_)
            | Command::CompressArchive(_)
            | Command::Other { .. } => OpType::Update,
        }
    }

    /// Entity type this command touches.
    #[must_use]
    pub fn entity_type(&self) -> &'static str {
        match self {
            Command::MoveToArchive(_)
            | Command::RestoreTask(_)
            | Command::UpdateTask(_)
            | Command::UpdateTasks(_)
            | Command::Other { .. } => entity::TASK,
            Command::FlushYoungToOld(_) | Command::CompressArchive(_) => entity::ARCHIVE,
            Command::DeleteProject(_) => entity::PROJECT,
            Command::DeleteTag(_) | Command::DeleteTags(_) => entity::TAG,
            Command::DeleteTaskRepeatCfg(_) => entity::TASK_REPEAT_CFG,
            Command::DeleteIssueProvider(_) | Command::DeleteIssueProviders(_) => {
                entity::ISSUE_PROVIDER
            }
            Command::LoadAllData(_) => entity::ALL,
        }
    }

    /// Ids of the entities this command touches.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<String> {
        match self {
            Command::MoveToArchive(p) => p
                .tasks
                .iter()
                .flat_map(|t| {
                    std::iter::once(t.task.id.clone()).chain(t.sub_tasks.iter().map(|s| s.id.clone()))
                })
                .collect(),
            Command::RestoreTask(p) => vec![p.task.id.clone()],
            Command::UpdateTask(p) => vec![p.id.clone()],
            Command::UpdateTasks(p) => p.updates.iter().map(|u| u.id.clone()).collect(),
            Command::DeleteProject(p) => vec![p.project_id.clone()],
            Command::DeleteTag(p) => vec![p.id.clone()],
            Command::DeleteTags(p) => p.ids.clone(),
            Command::DeleteTaskRepeatCfg(p) => vec![p.task_repeat_cfg_id.clone()],
            Command::DeleteIssueProvider(p) => vec![p.issue_provider_id.clone()],
            Command::DeleteIssueProviders(p) => p.ids.clone(),
            Command::FlushYoungToOld(_)
            | Command::CompressArchive(_)
            | Command::LoadAllData(_)
            | Command::Other { .. } => Vec::new(),
        }
    }

    /// Wraps this command in a new operation.
    ///
    /// `vector_clock` must already include the tick for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_operation(
        &self,
        client_id: &str,
        vector_clock: VectorClock,
        timestamp: Timestamp,
        schema_version: u32,
    ) -> ProtocolResult<Operation> {
        let mut ids = self.entity_ids();
        let (entity_id, entity_ids) = match ids.len() {
            0 => (None, None),
            1 => (ids.pop(), None),
            _ => (None, Some(ids)),
        };
        Ok(Operation {
            id: uuid::Uuid::now_v7().to_string(),
            action_type: self.action_type().to_string(),
            op_type: self.op_type(),
            entity_type: self.entity_type().to_string(),
            entity_id,
            entity_ids,
            payload: self.payload()?,
            client_id: client_id.to_string(),
            vector_clock,
            timestamp,
            schema_version,
        })
    }
}

/// Metadata attached to a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMeta {
    /// The command is written to the operation log.
    pub is_persistent: bool,
    /// The command was executed by another client and is being replayed.
    pub is_remote: bool,
    /// Entity type.
    pub entity_type: String,
    /// Kind of change.
    pub op_type: OpType,
}

/// A command plus the metadata deciding which side effects run.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentCommand {
    /// The command.
    pub command: Command,
    /// Its metadata.
    pub meta: CommandMeta,
}

impl PersistentCommand {
    /// Wraps a freshly issued local command.
    #[must_use]
    pub fn local(command: Command) -> Self {
        let meta = CommandMeta {
            is_persistent: true,
            is_remote: false,
            entity_type: command.entity_type().to_string(),
            op_type: command.op_type(),
        };
        Self { command, meta }
    }

    /// Rebuilds the command of a replayed operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation's payload does not match its action type.
    pub fn remote(op: &Operation) -> ProtocolResult<Self> {
        Ok(Self {
            command: Command::from_operation(op)?,
            meta: CommandMeta {
                is_persistent: true,
                is_remote: true,
                entity_type: op.entity_type.clone(),
                op_type: op.op_type,
            },
        })
    }

    /// Returns true if this is a replay of another client's command.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.meta.is_remote
    }
}
