//! Tracked entity types.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of synced fitness record.
///
/// The engine treats payloads as opaque; the entity type only selects which
/// cloud table a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// A completed or in-progress workout session.
    WorkoutLog,
    /// A single set inside a workout log.
    Set,
    /// A multi-week training program.
    Program,
    /// A reusable workout definition.
    WorkoutTemplate,
    /// A workout planned for a future date.
    ScheduledWorkout,
}

impl EntityType {
    /// Every tracked entity type, in pull order.
    pub const ALL: [EntityType; 5] = [
        EntityType::WorkoutLog,
        EntityType::Set,
        EntityType::Program,
        EntityType::WorkoutTemplate,
        EntityType::ScheduledWorkout,
    ];

    /// Returns the stable table name of this entity type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::WorkoutLog => "workout_log",
            EntityType::Set => "set",
            EntityType::Program => "program",
            EntityType::WorkoutTemplate => "workout_template",
            EntityType::ScheduledWorkout => "scheduled_workout",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        EntityType::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityType(s.to_string()))
    }
}
