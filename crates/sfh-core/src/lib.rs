//! Core entity model for the SkillsFuture course-catalog harvester.
//!
//! Every entity is a flat record of text columns. Records are staged into
//! [`Table`]s, stamped with a shared `_accessed_at` value and handed to a sink
//! as textual [`Row`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "sfh-core";

/// Column added to every persisted row, set once per harvest batch.
pub const ACCESSED_AT: &str = "_accessed_at";

/// Second-precision wall-clock format used for `_accessed_at`.
pub const ACCESSED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A persisted row: column name to textual value.
pub type Row = BTreeMap<String, String>;

/// Sink table name plus the natural key columns that identify one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub natural_key: &'static [&'static str],
}

pub trait Record: Serialize + Clone + Send + Sync + 'static {
    const SPEC: TableSpec;
}

/// Tables written by the course-search harvest.
pub const COURSE_TABLES: &[TableSpec] = &[
    Course::SPEC,
    TrainingArea::SPEC,
    LanguageOfInstruction::SPEC,
    FeaturedInitiative::SPEC,
    SkillsFutureInitiative::SPEC,
];

/// Tables written by the per-course detail harvest.
pub const DETAIL_TABLES: &[TableSpec] = &[
    CourseDetails::SPEC,
    CourseRun::SPEC,
    Trainer::SPEC,
    JobRoleCourseDetails::SPEC,
    ModeOfTraining::SPEC,
];

pub fn all_tables() -> impl Iterator<Item = TableSpec> {
    COURSE_TABLES.iter().chain(DETAIL_TABLES.iter()).copied()
}

pub fn table_spec(name: &str) -> Option<TableSpec> {
    all_tables().find(|spec| spec.name == name)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Course {
    pub course_uuid: String,
    pub course_reference_number: String,
    pub course_created_date: String,
    pub course_nearest_start_date: String,
    pub course_funding_method: String,
    pub quality_count_respondents: String,
    pub quality_rating_out_of_5: String,
    pub course_title: String,
    pub course_duration: String,
    pub course_fees: String,
    pub training_partner_name: String,
    pub training_partner_uen: String,
    pub training_partner_course_reference: String,
}

impl Record for Course {
    const SPEC: TableSpec = TableSpec {
        name: "courses",
        natural_key: &["course_reference_number"],
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrainingArea {
    pub course_reference_number: String,
    pub area_of_training_id: String,
    pub area_of_training_text: String,
}

impl Record for TrainingArea {
    const SPEC: TableSpec = TableSpec {
        name: "training_areas",
        natural_key: &["course_reference_number", "area_of_training_id"],
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LanguageOfInstruction {
    pub course_reference_number: String,
    pub language_of_instruction: String,
}

impl Record for LanguageOfInstruction {
    const SPEC: TableSpec = TableSpec {
        name: "languages",
        natural_key: &["course_reference_number", "language_of_instruction"],
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeaturedInitiative {
    pub course_reference_number: String,
    pub featured_initiatives_tag: String,
}

impl Record for FeaturedInitiative {
    const SPEC: TableSpec = TableSpec {
        name: "featured_initiatives",
        natural_key: &["course_reference_number", "featured_initiatives_tag"],
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkillsFutureInitiative {
    pub course_reference_number: String,
    pub skillsfuture_initiatives_tag: String,
}

impl Record for SkillsFutureInitiative {
    const SPEC: TableSpec = TableSpec {
        name: "skillsfuture_initiatives",
        natural_key: &["course_reference_number", "skillsfuture_initiatives_tag"],
    };
}

/// Extended course fields from the per-course detail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CourseDetails {
    pub course_reference_number: String,
    pub course_title: String,
    pub course_objective: String,
    pub course_content: String,
    pub entry_requirement: String,
    pub training_days: String,
    pub training_duration_hours: String,
    pub count_attendees: String,
    pub qualification_attained_id: String,
    pub qualification_attained_name: String,
}

impl Record for CourseDetails {
    const SPEC: TableSpec = TableSpec {
        name: "course_details",
        natural_key: &["course_reference_number"],
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CourseRun {
    pub course_reference_number: String,
    pub course_run_id: String,
    pub course_run_start_date: String,
    pub course_run_end_date: String,
    pub registration_start_date: String,
    pub registration_end_date: String,
    pub course_run_training_mode: String,
    pub course_intake_size: String,
    pub address_block: String,
    pub address_street: String,
    pub address_floor: String,
    pub address_unit: String,
    pub address_building: String,
    pub address_postal_code: String,
    pub address_room: String,
}

impl Record for CourseRun {
    const SPEC: TableSpec = TableSpec {
        name: "course_runs",
        natural_key: &["course_run_id"],
    };
}

/// One trainer assigned to one course run. A person recurs once per run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trainer {
    pub course_reference_number: String,
    pub course_run_id: String,
    pub trainer_id: String,
    pub trainer_id_number: String,
    pub trainer_id_type_code: String,
    pub trainer_uuid: String,
    pub trainer_name: String,
    pub trainer_email: String,
    pub trainer_practice_area: String,
    pub trainer_qualification_level: String,
    pub trainer_experience: String,
}

impl Record for Trainer {
    const SPEC: TableSpec = TableSpec {
        name: "trainers",
        natural_key: &["course_run_id", "trainer_id_number", "trainer_uuid"],
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobRoleCourseDetails {
    pub course_reference_number: String,
    pub job_role: String,
}

impl Record for JobRoleCourseDetails {
    const SPEC: TableSpec = TableSpec {
        name: "job_roles",
        natural_key: &["course_reference_number", "job_role"],
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeOfTraining {
    pub course_reference_number: String,
    pub mode_of_training_description: String,
}

impl Record for ModeOfTraining {
    const SPEC: TableSpec = TableSpec {
        name: "mode_of_trainings",
        natural_key: &["course_reference_number", "mode_of_training_description"],
    };
}

/// In-memory table of typed records for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<T> {
    records: Vec<T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Record> Table<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spec(&self) -> TableSpec {
        T::SPEC
    }

    pub fn push(&mut self, record: T) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = T>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render every record as a row carrying the same `_accessed_at` stamp.
    pub fn to_rows(&self, accessed_at: &str) -> Vec<Row> {
        self.records
            .iter()
            .map(|record| {
                let mut row = record_to_row(record);
                row.insert(ACCESSED_AT.to_string(), accessed_at.to_string());
                row
            })
            .collect()
    }
}

/// Flatten a record into text columns. Numbers and booleans are written as
/// their JSON text, nulls and nested values as the empty sentinel.
pub fn record_to_row<T: Serialize>(record: &T) -> Row {
    match serde_json::to_value(record) {
        Ok(JsonValue::Object(map)) => map
            .into_iter()
            .map(|(column, value)| (column, scalar_text(&value)))
            .collect(),
        _ => Row::new(),
    }
}

/// Textual form of a scalar JSON value; the empty string for anything else.
pub fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => String::new(),
    }
}

pub fn accessed_at_stamp(now: DateTime<Utc>) -> String {
    now.format(ACCESSED_AT_FORMAT).to_string()
}

/// Values of `columns` in `row`, with absent columns read as empty.
pub fn natural_key_of(row: &Row, columns: &[&str]) -> Vec<String> {
    columns
        .iter()
        .map(|column| row.get(*column).cloned().unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rows_share_one_accessed_at_stamp() {
        let mut table = Table::<LanguageOfInstruction>::new();
        table.push(LanguageOfInstruction {
            course_reference_number: "TGS-1".into(),
            language_of_instruction: "English".into(),
        });
        table.push(LanguageOfInstruction {
            course_reference_number: "TGS-1".into(),
            language_of_instruction: "Mandarin".into(),
        });

        let rows = table.to_rows("2026-02-24 12:00:00");
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|row| row.get(ACCESSED_AT).map(String::as_str) == Some("2026-02-24 12:00:00")));
        assert_eq!(rows[1]["language_of_instruction"], "Mandarin");
    }

    #[test]
    fn scalar_text_forces_numbers_to_text() {
        assert_eq!(scalar_text(&serde_json::json!(4.5)), "4.5");
        assert_eq!(scalar_text(&serde_json::json!(12)), "12");
        assert_eq!(scalar_text(&serde_json::json!(true)), "true");
        assert_eq!(scalar_text(&serde_json::json!(null)), "");
        assert_eq!(scalar_text(&serde_json::json!({"a": 1})), "");
    }

    #[test]
    fn accessed_at_has_second_precision() {
        let now = Utc.with_ymd_and_hms(2026, 2, 24, 7, 5, 9).single().unwrap();
        assert_eq!(accessed_at_stamp(now), "2026-02-24 07:05:09");
    }

    #[test]
    fn natural_key_reads_missing_columns_as_empty() {
        let mut row = Row::new();
        row.insert("course_run_id".into(), "R1".into());
        let key = natural_key_of(&row, Trainer::SPEC.natural_key);
        assert_eq!(key, vec!["R1".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn every_table_is_registered_once() {
        let names: Vec<_> = all_tables().map(|spec| spec.name).collect();
        let mut deduped = names.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
        assert_eq!(table_spec("trainers"), Some(Trainer::SPEC));
        assert_eq!(table_spec("nope"), None);
    }
}
