use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const COMPLETION_STATUS_COMPLETE: &str = "complete";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Asana,
    Series,
    Sequence,
}

struct EntityFields {
    id_field: &'static str,
    name_field: &'static str,
    activity_path: &'static str,
}

const ASANA_FIELDS: EntityFields = EntityFields {
    id_field: "asanaId",
    name_field: "asanaName",
    activity_path: "/api/asanaActivity",
};

const SERIES_FIELDS: EntityFields = EntityFields {
    id_field: "seriesId",
    name_field: "seriesName",
    activity_path: "/api/seriesActivity",
};

const SEQUENCE_FIELDS: EntityFields = EntityFields {
    id_field: "sequenceId",
    name_field: "sequenceName",
    activity_path: "/api/sequenceActivity",
};

impl EntityType {
    fn fields(self) -> &'static EntityFields {
        match self {
            Self::Asana => &ASANA_FIELDS,
            Self::Series => &SERIES_FIELDS,
            Self::Sequence => &SEQUENCE_FIELDS,
        }
    }

    /// Payload key carrying the entity id, e.g. `asanaId`.
    pub fn id_field(self) -> &'static str {
        self.fields().id_field
    }

    pub fn name_field(self) -> &'static str {
        self.fields().name_field
    }

    /// Path fragment shared by the activity endpoint and invalidation urls.
    pub fn activity_path(self) -> &'static str {
        self.fields().activity_path
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asana => "asana",
            Self::Series => "series",
            Self::Sequence => "sequence",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asana" | "pose" => Some(Self::Asana),
            "series" => Some(Self::Series),
            "sequence" => Some(Self::Sequence),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Average,
    Difficult,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Average, Self::Difficult];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Average => "average",
            Self::Difficult => "difficult",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "average" => Some(Self::Average),
            "difficult" => Some(Self::Difficult),
            _ => None,
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Easy => 0,
            Self::Average => 1,
            Self::Difficult => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Selecting a difficulty only changes local state until the next toggle.
    #[default]
    Card,
    /// Every selection is persisted immediately.
    Chips,
}

impl SelectionMode {
    pub fn persists_on_select(self) -> bool {
        matches!(self, Self::Chips)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub user_id: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub entity_name: String,
    pub difficulty: Option<Difficulty>,
    pub completion_status: String,
    pub date_performed: DateTime<Utc>,
    pub additional_data: Map<String, Value>,
}

impl ActivityRecord {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.user_id, "activity.user_id")?;
        validate_non_empty(&self.entity_id, "activity.entity_id")?;
        validate_non_empty(&self.completion_status, "activity.completion_status")?;
        Ok(())
    }

    /// Creation payload sent to the remote store. Caller-supplied fields are
    /// copied first so the tracked identity can never be overwritten by them.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = self.additional_data.clone();
        payload.insert("userId".to_string(), Value::String(self.user_id.clone()));
        payload.insert(
            self.entity_type.id_field().to_string(),
            Value::String(self.entity_id.clone()),
        );
        payload.insert(
            self.entity_type.name_field().to_string(),
            Value::String(self.entity_name.clone()),
        );
        payload.insert(
            "entityType".to_string(),
            Value::String(self.entity_type.as_str().to_string()),
        );
        payload.insert(
            "difficulty".to_string(),
            self.difficulty
                .map(|difficulty| Value::String(difficulty.as_str().to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "completionStatus".to_string(),
            Value::String(self.completion_status.clone()),
        );
        payload.insert(
            "datePerformed".to_string(),
            Value::String(self.date_performed.to_rfc3339()),
        );
        payload
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot {
    #[serde(default, deserialize_with = "deserialize_difficulty")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_performed: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActivitySnapshot {
    /// A snapshot dated on an earlier local day than `now` is yesterday's entry.
    pub fn is_for_day_of(&self, now: DateTime<Utc>, timezone: Tz) -> bool {
        match self.date_performed {
            Some(performed) => local_date(performed, timezone) >= local_date(now, timezone),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActivityCheck {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivitySnapshot>,
}

impl ActivityCheck {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(activity: ActivitySnapshot) -> Self {
        Self {
            exists: true,
            activity: Some(activity),
        }
    }

    /// The snapshot that counts as today's activity, if any.
    pub fn active_today(&self, now: DateTime<Utc>, timezone: Tz) -> Option<ActivitySnapshot> {
        if !self.exists {
            return None;
        }
        let snapshot = self.activity.clone().unwrap_or_default();
        snapshot.is_for_day_of(now, timezone).then_some(snapshot)
    }
}

/// Unknown or empty difficulty strings read back from the store mean "unrated".
fn deserialize_difficulty<'de, D>(deserializer: D) -> Result<Option<Difficulty>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Difficulty::parse))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToggleState {
    pub checked: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub selected_difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Unchecked,
    Checking,
    Checked,
    Error,
}

impl ToggleState {
    pub fn phase(&self) -> TrackerPhase {
        if self.loading {
            TrackerPhase::Checking
        } else if self.error.is_some() {
            TrackerPhase::Error
        } else if self.checked {
            TrackerPhase::Checked
        } else {
            TrackerPhase::Unchecked
        }
    }

    /// Filled state of the easy/average/difficult indicators.
    pub fn difficulty_slots(&self) -> [bool; 3] {
        difficulty_slots(self.selected_difficulty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfirmedState {
    pub checked: bool,
    pub difficulty: Option<Difficulty>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

pub fn difficulty_slots(selected: Option<Difficulty>) -> [bool; 3] {
    let mut slots = [false; 3];
    if let Some(difficulty) = selected {
        slots[difficulty.slot()] = true;
    }
    slots
}

pub fn local_date(at: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    at.with_timezone(&timezone).date_naive()
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
