//! Typed fitness entities.
//!
//! These are the UI layer's view of record payloads. The engine only ever
//! sees the encoded [`Payload`].

use crate::entity::EntityType;
use crate::error::{ProtocolError, ProtocolResult};
use crate::id::RecordId;
use crate::payload::Payload;
use crate::record::{SyncableRecord, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A typed entity stored in a record payload.
pub trait Entity: Serialize + DeserializeOwned {
    /// Entity type the payload belongs to.
    const ENTITY_TYPE: EntityType;

    /// Encodes this entity as a record payload.
    fn to_payload(&self) -> ProtocolResult<Payload> {
        Payload::encode(self)
    }

    /// Decodes this entity from a record, checking the entity type.
    fn from_record(record: &SyncableRecord) -> ProtocolResult<Self> {
        if record.entity_type != Self::ENTITY_TYPE {
            return Err(ProtocolError::EntityMismatch {
                expected: Self::ENTITY_TYPE.as_str(),
                found: record.entity_type.as_str(),
            });
        }
        record.payload.decode()
    }
}

/// A logged workout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutLog {
    /// Free-form workout type ("strength", "run", ...).
    pub workout_type: String,
    /// Session start (Unix ms).
    pub started_at: Timestamp,
    /// Session length in seconds.
    pub duration_secs: u32,
    /// User notes.
    pub notes: String,
}

impl Entity for WorkoutLog {
    const ENTITY_TYPE: EntityType = EntityType::WorkoutLog;
}

/// One set performed inside a workout log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    /// Parent workout log.
    pub workout_log_id: RecordId,
    /// Exercise name.
    pub exercise: String,
    /// Position within the workout.
    pub set_index: u32,
    /// Repetitions performed.
    pub reps: u32,
    /// Load in kilograms.
    pub weight_kg: f32,
}

impl Entity for WorkoutSet {
    const ENTITY_TYPE: EntityType = EntityType::Set;
}

/// A multi-week training program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Program name.
    pub name: String,
    /// Length in weeks.
    pub weeks: u32,
    /// Optional description.
    pub description: Option<String>,
}

impl Entity for Program {
    const ENTITY_TYPE: EntityType = EntityType::Program;
}

/// A reusable workout definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutTemplate {
    /// Template name.
    pub name: String,
    /// Program the template belongs to, if any.
    pub program_id: Option<RecordId>,
    /// Ordered exercise names.
    pub exercises: Vec<String>,
}

impl Entity for WorkoutTemplate {
    const ENTITY_TYPE: EntityType = EntityType::WorkoutTemplate;
}

/// A workout planned for a given date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledWorkout {
    /// Template to perform, if any.
    pub template_id: Option<RecordId>,
    /// Planned date (Unix ms).
    pub scheduled_for: Timestamp,
    /// Log created when the workout was performed.
    pub completed_log_id: Option<RecordId>,
}

impl Entity for ScheduledWorkout {
    const ENTITY_TYPE: EntityType = EntityType::ScheduledWorkout;
}
