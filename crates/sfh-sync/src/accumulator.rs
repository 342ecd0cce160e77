use anyhow::{Context, Result};
use sfh_adapters::{ParsedCourses, ParsedDetail};
use sfh_core::{
    Course, CourseDetails, CourseRun, FeaturedInitiative, JobRoleCourseDetails,
    LanguageOfInstruction, ModeOfTraining, Record, Row, SkillsFutureInitiative, Table, TableSpec,
    Trainer, TrainingArea,
};
use sfh_storage::TableSink;
use tracing::debug;

/// Per-entity tables filled across a bounded number of fetches.
pub trait SnapshotBatch: Default + Send {
    type Parsed;

    fn add(&mut self, parsed: Self::Parsed);

    /// Every table rendered to rows sharing one `_accessed_at` value.
    fn rows(&self, accessed_at: &str) -> Vec<(TableSpec, Vec<Row>)>;

    fn is_empty(&self) -> bool;
}

fn rendered<T: Record>(table: &Table<T>, accessed_at: &str) -> (TableSpec, Vec<Row>) {
    (table.spec(), table.to_rows(accessed_at))
}

#[derive(Debug, Default)]
pub struct CourseBatch {
    pub courses: Table<Course>,
    pub training_areas: Table<TrainingArea>,
    pub languages: Table<LanguageOfInstruction>,
    pub featured_initiatives: Table<FeaturedInitiative>,
    pub skillsfuture_initiatives: Table<SkillsFutureInitiative>,
}

impl SnapshotBatch for CourseBatch {
    type Parsed = ParsedCourses;

    fn add(&mut self, parsed: ParsedCourses) {
        self.courses.extend(parsed.courses);
        self.training_areas.extend(parsed.training_areas);
        self.languages.extend(parsed.languages);
        self.featured_initiatives.extend(parsed.featured_initiatives);
        self.skillsfuture_initiatives
            .extend(parsed.skillsfuture_initiatives);
    }

    fn rows(&self, accessed_at: &str) -> Vec<(TableSpec, Vec<Row>)> {
        vec![
            rendered(&self.courses, accessed_at),
            rendered(&self.training_areas, accessed_at),
            rendered(&self.languages, accessed_at),
            rendered(&self.featured_initiatives, accessed_at),
            rendered(&self.skillsfuture_initiatives, accessed_at),
        ]
    }

    fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DetailBatch {
    pub details: Table<CourseDetails>,
    pub course_runs: Table<CourseRun>,
    pub trainers: Table<Trainer>,
    pub job_roles: Table<JobRoleCourseDetails>,
    pub mode_of_trainings: Table<ModeOfTraining>,
}

impl SnapshotBatch for DetailBatch {
    type Parsed = ParsedDetail;

    fn add(&mut self, parsed: ParsedDetail) {
        self.details.extend(parsed.details);
        self.course_runs.extend(parsed.course_runs);
        self.trainers.extend(parsed.trainers);
        self.job_roles.extend(parsed.job_roles);
        self.mode_of_trainings.extend(parsed.mode_of_trainings);
    }

    fn rows(&self, accessed_at: &str) -> Vec<(TableSpec, Vec<Row>)> {
        vec![
            rendered(&self.details, accessed_at),
            rendered(&self.course_runs, accessed_at),
            rendered(&self.trainers, accessed_at),
            rendered(&self.job_roles, accessed_at),
            rendered(&self.mode_of_trainings, accessed_at),
        ]
    }

    fn is_empty(&self) -> bool {
        self.details.is_empty()
    }
}

/// Append every non-empty table of `batch`; returns the number of rows written.
/// The first failing append aborts the flush.
pub async fn flush<B: SnapshotBatch>(
    sink: &dyn TableSink,
    batch: &B,
    accessed_at: &str,
) -> Result<usize> {
    let mut written = 0;
    for (spec, rows) in batch.rows(accessed_at) {
        if rows.is_empty() {
            continue;
        }
        sink.append(spec.name, &rows)
            .await
            .with_context(|| format!("appending {} rows to {}", rows.len(), spec.name))?;
        debug!(table = spec.name, rows = rows.len(), "appended batch");
        written += rows.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfh_core::ACCESSED_AT;
    use sfh_storage::MemorySink;

    fn parsed_course(crn: &str, rating: &str) -> ParsedCourses {
        ParsedCourses {
            courses: vec![Course {
                course_reference_number: crn.into(),
                quality_rating_out_of_5: rating.into(),
                ..Default::default()
            }],
            training_areas: vec![TrainingArea {
                course_reference_number: crn.into(),
                area_of_training_id: "01".into(),
                area_of_training_text: "Food".into(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn flush_stamps_every_row_with_the_same_timestamp() {
        let sink = MemorySink::new();
        let mut batch = CourseBatch::default();
        batch.add(parsed_course("TGS-1", "4.5"));
        batch.add(parsed_course("TGS-2", ""));

        let written = flush(&sink, &batch, "2026-10-16 08:00:00").await.unwrap();
        assert_eq!(written, 4);

        for table in ["courses", "training_areas"] {
            let rows = sink.read(table).await.unwrap();
            assert_eq!(rows.len(), 2);
            assert!(rows
                .iter()
                .all(|row| row.get(ACCESSED_AT).map(String::as_str) == Some("2026-10-16 08:00:00")));
        }
        let courses = sink.read("courses").await.unwrap();
        assert_eq!(courses[0]["quality_rating_out_of_5"], "4.5");
        assert_eq!(courses[1]["quality_rating_out_of_5"], "");
    }

    #[tokio::test]
    async fn empty_tables_are_not_created() {
        let sink = MemorySink::new();
        let mut batch = CourseBatch::default();
        batch.add(parsed_course("TGS-1", "5"));
        flush(&sink, &batch, "2026-10-16 08:00:00").await.unwrap();
        assert_eq!(sink.table_names().await, vec!["courses", "training_areas"]);
    }

    #[test]
    fn detail_batch_collects_all_child_tables() {
        let mut batch = DetailBatch::default();
        assert!(batch.is_empty());
        batch.add(ParsedDetail {
            details: vec![CourseDetails::default()],
            job_roles: vec![JobRoleCourseDetails {
                course_reference_number: "TGS-1".into(),
                job_role: "Chef".into(),
            }],
            ..Default::default()
        });
        assert!(!batch.is_empty());
        let names: Vec<_> = batch
            .rows("2026-10-16 08:00:00")
            .into_iter()
            .map(|(spec, _)| spec.name)
            .collect();
        assert_eq!(
            names,
            vec!["course_details", "course_runs", "trainers", "job_roles", "mode_of_trainings"]
        );
    }
}
