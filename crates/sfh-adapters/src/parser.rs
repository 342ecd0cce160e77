//! Maps raw catalog JSON into flat entity records.
//!
//! Each document is decoded once into a fully-defaulted raw shape. Every
//! scalar decodes to text (absent, null or nested values become the empty
//! string), every repeated field to a list (anything but an array becomes
//! empty), so decoding cannot fail. Elements of nested lists that are not
//! objects are skipped individually.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use sfh_core::{
    scalar_text, Course, CourseDetails, CourseRun, FeaturedInitiative, JobRoleCourseDetails,
    LanguageOfInstruction, ModeOfTraining, SkillsFutureInitiative, Trainer, TrainingArea,
};

/// Records produced from search-result course groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCourses {
    pub courses: Vec<Course>,
    pub training_areas: Vec<TrainingArea>,
    pub languages: Vec<LanguageOfInstruction>,
    pub featured_initiatives: Vec<FeaturedInitiative>,
    pub skillsfuture_initiatives: Vec<SkillsFutureInitiative>,
}

impl ParsedCourses {
    pub fn extend(&mut self, other: ParsedCourses) {
        self.courses.extend(other.courses);
        self.training_areas.extend(other.training_areas);
        self.languages.extend(other.languages);
        self.featured_initiatives.extend(other.featured_initiatives);
        self.skillsfuture_initiatives
            .extend(other.skillsfuture_initiatives);
    }
}

/// Records produced from one course detail document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDetail {
    pub details: Vec<CourseDetails>,
    pub mode_of_trainings: Vec<ModeOfTraining>,
    pub course_runs: Vec<CourseRun>,
    pub trainers: Vec<Trainer>,
    pub job_roles: Vec<JobRoleCourseDetails>,
}

fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(&JsonValue::deserialize(deserializer)?))
}

fn text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Array(items) => items.iter().map(scalar_text).collect(),
        _ => Vec::new(),
    })
}

fn items<'de, D>(deserializer: D) -> Result<Vec<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Array(items) => items,
        _ => Vec::new(),
    })
}

fn object<'de, D>(deserializer: D) -> Result<JsonValue, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(if value.is_object() {
        value
    } else {
        JsonValue::Null
    })
}

/// Decode an object into a raw shape; `None` for anything that is not an object.
fn decode<T: DeserializeOwned>(value: &JsonValue) -> Option<T> {
    if !value.is_object() {
        return None;
    }
    T::deserialize(value).ok()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCourseGroup {
    #[serde(rename = "groupValue", deserialize_with = "text")]
    group_value: String,
    #[serde(deserialize_with = "object")]
    doclist: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocList {
    #[serde(deserialize_with = "items")]
    docs: Vec<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCourseDoc {
    #[serde(rename = "Course_Ref_No", deserialize_with = "text")]
    course_ref_no: String,
    #[serde(rename = "Course_Created_Date", deserialize_with = "text")]
    created_date: String,
    #[serde(rename = "Course_Start_Date_Nearest", deserialize_with = "text")]
    start_date_nearest: String,
    #[serde(rename = "Course_Funding", deserialize_with = "text")]
    funding: String,
    #[serde(rename = "Course_Quality_NumberOfRespondents", deserialize_with = "text")]
    quality_respondents: String,
    #[serde(rename = "Course_Quality_Stars_Rating", deserialize_with = "text")]
    quality_stars: String,
    #[serde(rename = "Course_Title", deserialize_with = "text")]
    title: String,
    #[serde(rename = "Len_of_Course_Duration_facet", deserialize_with = "text")]
    duration: String,
    #[serde(rename = "Tol_Cost_of_Trn_Per_Trainee", deserialize_with = "text")]
    cost_per_trainee: String,
    #[serde(rename = "Organisation_Name", deserialize_with = "text")]
    organisation_name: String,
    #[serde(rename = "UEN", deserialize_with = "text")]
    uen: String,
    #[serde(rename = "EXT_Course_Ref_No", deserialize_with = "text")]
    external_ref_no: String,
    #[serde(rename = "Area_of_Training", deserialize_with = "text_list")]
    area_ids: Vec<String>,
    #[serde(rename = "Area_of_Training_text", deserialize_with = "text_list")]
    area_texts: Vec<String>,
    #[serde(rename = "Medium_of_Instruction_text", deserialize_with = "text_list")]
    languages: Vec<String>,
    #[serde(rename = "Tags_text_FeaturedInitiatives", deserialize_with = "text_list")]
    featured_tags: Vec<String>,
    #[serde(rename = "Tags_text_SFInitiatives", deserialize_with = "text_list")]
    skillsfuture_tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawCourseDetail {
    #[serde(deserialize_with = "text")]
    course_reference_number: String,
    #[serde(deserialize_with = "text")]
    course_title: String,
    #[serde(deserialize_with = "text")]
    course_objective: String,
    #[serde(deserialize_with = "text")]
    course_content: String,
    #[serde(deserialize_with = "text")]
    entry_requirement: String,
    #[serde(deserialize_with = "text")]
    number_of_training_day: String,
    #[serde(deserialize_with = "text")]
    total_training_duration_hour: String,
    #[serde(deserialize_with = "text")]
    course_attendee_count: String,
    #[serde(deserialize_with = "object")]
    qualification_attained: JsonValue,
    #[serde(deserialize_with = "items")]
    mode_of_trainings: Vec<JsonValue>,
    #[serde(deserialize_with = "items")]
    course_runs: Vec<JsonValue>,
    #[serde(deserialize_with = "text")]
    relevant_job_roles: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawQualification {
    #[serde(deserialize_with = "text")]
    qualification_attained_code: String,
    #[serde(deserialize_with = "text")]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawModeOfTraining {
    #[serde(deserialize_with = "text")]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawCourseRun {
    #[serde(deserialize_with = "text")]
    course_run_id: String,
    #[serde(deserialize_with = "text")]
    course_start_date: String,
    #[serde(deserialize_with = "text")]
    course_end_date: String,
    #[serde(deserialize_with = "text")]
    registration_opening_date: String,
    #[serde(deserialize_with = "text")]
    registration_closing_date: String,
    #[serde(deserialize_with = "text")]
    mode_of_training: String,
    #[serde(deserialize_with = "text")]
    intake_size: String,
    #[serde(deserialize_with = "text")]
    block: String,
    #[serde(deserialize_with = "text")]
    street: String,
    #[serde(deserialize_with = "text")]
    floor: String,
    #[serde(deserialize_with = "text")]
    unit: String,
    #[serde(deserialize_with = "text")]
    building: String,
    #[serde(deserialize_with = "text")]
    postal_code: String,
    #[serde(deserialize_with = "text")]
    room: String,
    #[serde(deserialize_with = "items")]
    link_course_run_trainer: Vec<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTrainerLink {
    // null when absent or not an object
    #[serde(deserialize_with = "object")]
    trainer: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawTrainer {
    #[serde(deserialize_with = "text")]
    trainer_id: String,
    #[serde(deserialize_with = "text")]
    id_number: String,
    #[serde(deserialize_with = "text")]
    id_type_code: String,
    #[serde(deserialize_with = "text")]
    uuid: String,
    #[serde(deserialize_with = "text")]
    name: String,
    #[serde(deserialize_with = "text")]
    email: String,
    #[serde(deserialize_with = "text")]
    domain_area_of_practice: String,
    #[serde(deserialize_with = "text")]
    qualification_level: String,
    #[serde(deserialize_with = "text")]
    experience: String,
}

/// The course groups of a search response, or `None` when the response does
/// not have the `grouped.GroupID.groups` list.
pub fn search_groups(response: &JsonValue) -> Option<&[JsonValue]> {
    response
        .get("grouped")?
        .get("GroupID")?
        .get("groups")?
        .as_array()
        .map(Vec::as_slice)
}

/// The `data` member of a detail response, if present and not null.
pub fn detail_document(response: &JsonValue) -> Option<&JsonValue> {
    response.get("data").filter(|data| !data.is_null())
}

pub fn parse_search_groups(groups: &[JsonValue]) -> ParsedCourses {
    let mut parsed = ParsedCourses::default();
    for group in groups {
        parsed.extend(parse_course_group(group));
    }
    parsed
}

/// One search group holds one course; its first doc carries the fields.
/// A group that is not an object yields nothing.
pub fn parse_course_group(group: &JsonValue) -> ParsedCourses {
    let Some(raw) = decode::<RawCourseGroup>(group) else {
        return ParsedCourses::default();
    };
    let doc = decode::<RawDocList>(&raw.doclist)
        .and_then(|list| list.docs.first().and_then(decode::<RawCourseDoc>))
        .unwrap_or_default();
    let crn = doc.course_ref_no.clone();

    let training_areas = doc
        .area_ids
        .iter()
        .zip(doc.area_texts.iter())
        .map(|(id, label)| TrainingArea {
            course_reference_number: crn.clone(),
            area_of_training_id: id.clone(),
            area_of_training_text: label.clone(),
        })
        .collect();
    let languages = doc
        .languages
        .iter()
        .map(|language| LanguageOfInstruction {
            course_reference_number: crn.clone(),
            language_of_instruction: language.trim().to_string(),
        })
        .collect();
    let featured_initiatives = doc
        .featured_tags
        .iter()
        .map(|tag| FeaturedInitiative {
            course_reference_number: crn.clone(),
            featured_initiatives_tag: tag.clone(),
        })
        .collect();
    let skillsfuture_initiatives = doc
        .skillsfuture_tags
        .iter()
        .map(|tag| SkillsFutureInitiative {
            course_reference_number: crn.clone(),
            skillsfuture_initiatives_tag: tag.clone(),
        })
        .collect();

    let course = Course {
        course_uuid: raw.group_value,
        course_reference_number: crn,
        course_created_date: doc.created_date,
        course_nearest_start_date: doc.start_date_nearest,
        course_funding_method: doc.funding,
        quality_count_respondents: doc.quality_respondents,
        quality_rating_out_of_5: doc.quality_stars,
        course_title: doc.title,
        course_duration: doc.duration,
        course_fees: doc.cost_per_trainee,
        training_partner_name: doc.organisation_name,
        training_partner_uen: doc.uen,
        training_partner_course_reference: doc.external_ref_no,
    };

    ParsedCourses {
        courses: vec![course],
        training_areas,
        languages,
        featured_initiatives,
        skillsfuture_initiatives,
    }
}

/// All records derived from one detail document. A document that is not an
/// object yields nothing.
pub fn parse_course_detail(document: &JsonValue) -> ParsedDetail {
    let Some(raw) = decode::<RawCourseDetail>(document) else {
        return ParsedDetail::default();
    };
    let crn = raw.course_reference_number.clone();
    let runs: Vec<RawCourseRun> = raw.course_runs.iter().filter_map(decode).collect();

    ParsedDetail {
        details: vec![course_details(&raw)],
        mode_of_trainings: raw
            .mode_of_trainings
            .iter()
            .filter_map(decode::<RawModeOfTraining>)
            .map(|mode| ModeOfTraining {
                course_reference_number: crn.clone(),
                mode_of_training_description: mode.description,
            })
            .collect(),
        course_runs: runs.iter().map(|run| course_run(&crn, run)).collect(),
        trainers: runs
            .iter()
            .flat_map(|run| run_trainers(&crn, run))
            .collect(),
        job_roles: split_job_roles(&raw.relevant_job_roles)
            .into_iter()
            .map(|job_role| JobRoleCourseDetails {
                course_reference_number: crn.clone(),
                job_role,
            })
            .collect(),
    }
}

fn course_details(raw: &RawCourseDetail) -> CourseDetails {
    let qualification = decode::<RawQualification>(&raw.qualification_attained).unwrap_or_default();
    CourseDetails {
        course_reference_number: raw.course_reference_number.clone(),
        course_title: raw.course_title.clone(),
        course_objective: raw.course_objective.clone(),
        course_content: raw.course_content.clone(),
        entry_requirement: raw.entry_requirement.clone(),
        training_days: raw.number_of_training_day.clone(),
        training_duration_hours: raw.total_training_duration_hour.clone(),
        count_attendees: raw.course_attendee_count.clone(),
        qualification_attained_id: qualification.qualification_attained_code,
        qualification_attained_name: qualification.description,
    }
}

fn course_run(crn: &str, run: &RawCourseRun) -> CourseRun {
    CourseRun {
        course_reference_number: crn.to_string(),
        course_run_id: run.course_run_id.clone(),
        course_run_start_date: run.course_start_date.clone(),
        course_run_end_date: run.course_end_date.clone(),
        registration_start_date: run.registration_opening_date.clone(),
        registration_end_date: run.registration_closing_date.clone(),
        course_run_training_mode: run.mode_of_training.clone(),
        course_intake_size: run.intake_size.clone(),
        address_block: run.block.clone(),
        address_street: run.street.clone(),
        address_floor: run.floor.clone(),
        address_unit: run.unit.clone(),
        address_building: run.building.clone(),
        address_postal_code: run.postal_code.clone(),
        address_room: run.room.clone(),
    }
}

/// Trainers linked to one run. Links that are not objects, or whose
/// `trainer` is not an object, are skipped.
fn run_trainers(crn: &str, run: &RawCourseRun) -> Vec<Trainer> {
    run.link_course_run_trainer
        .iter()
        .filter_map(decode::<RawTrainerLink>)
        .filter_map(|link| decode::<RawTrainer>(&link.trainer))
        .map(|trainer| Trainer {
            course_reference_number: crn.to_string(),
            course_run_id: run.course_run_id.clone(),
            trainer_id: trainer.trainer_id,
            trainer_id_number: trainer.id_number,
            trainer_id_type_code: trainer.id_type_code,
            trainer_uuid: trainer.uuid,
            trainer_name: trainer.name,
            trainer_email: trainer.email,
            trainer_practice_area: trainer.domain_area_of_practice,
            trainer_qualification_level: trainer.qualification_level,
            trainer_experience: trainer.experience,
        })
        .collect()
}

/// Split a comma-separated list, trimming segments and dropping empty ones.
pub fn split_job_roles(roles: &str) -> Vec<String> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::{Path, PathBuf};

    fn fixture_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(name)
    }

    fn read_fixture(name: &str) -> JsonValue {
        let text = std::fs::read_to_string(fixture_path(name)).expect("read fixture");
        serde_json::from_str(&text).expect("parse fixture")
    }

    #[test]
    fn golden_snapshot_for_search_page_fixture() {
        let response = read_fixture("course-search/page.json");
        let groups = search_groups(&response).expect("grouped response");
        let actual = parse_search_groups(groups);
        let expected: ParsedCourses =
            serde_json::from_value(read_fixture("course-search/snapshot.json")).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn aligned_area_arrays_zip_into_pairs() {
        let group = json!({
            "groupValue": "uuid-1",
            "doclist": {"docs": [{
                "Course_Ref_No": "TGS-1",
                "Area_of_Training": ["A", "B"],
                "Area_of_Training_text": ["Alpha", "Beta"]
            }]}
        });
        let parsed = parse_course_group(&group);
        let pairs: Vec<_> = parsed
            .training_areas
            .iter()
            .map(|a| (a.area_of_training_id.as_str(), a.area_of_training_text.as_str()))
            .collect();
        assert_eq!(pairs, vec![("A", "Alpha"), ("B", "Beta")]);
        assert!(parsed
            .training_areas
            .iter()
            .all(|a| a.course_reference_number == "TGS-1"));
    }

    #[test]
    fn unequal_aligned_arrays_truncate_to_shorter() {
        let group = json!({
            "doclist": {"docs": [{
                "Course_Ref_No": "TGS-1",
                "Area_of_Training": ["A", "B", "C"],
                "Area_of_Training_text": ["Alpha"]
            }]}
        });
        assert_eq!(parse_course_group(&group).training_areas.len(), 1);
    }

    #[test]
    fn job_role_string_is_split_trimmed_and_filtered() {
        assert_eq!(
            split_job_roles("Chef, Waiter,  , Manager"),
            vec!["Chef", "Waiter", "Manager"]
        );
        assert!(split_job_roles("").is_empty());
        assert!(split_job_roles(" , ,").is_empty());
    }

    #[test]
    fn run_without_trainer_links_yields_no_trainers() {
        let doc = json!({
            "courseReferenceNumber": "TGS-9",
            "courseRuns": [{"courseRunId": "R1"}]
        });
        let parsed = parse_course_detail(&doc);
        assert_eq!(parsed.course_runs.len(), 1);
        assert!(parsed.trainers.is_empty());
    }

    #[test]
    fn malformed_nested_elements_are_skipped_individually() {
        let doc = json!({
            "courseReferenceNumber": "TGS-9",
            "courseRuns": [
                "not-a-run",
                {"courseRunId": "R1", "linkCourseRunTrainer": "not-a-list"},
                {"courseRunId": "R2", "linkCourseRunTrainer": [
                    7,
                    {"trainer": "not-an-object"},
                    {"trainer": {"uuid": "T-1", "idNumber": "S123", "name": "Ada"}}
                ]}
            ],
            "modeOfTrainings": [{"description": "Classroom"}, null, "x"]
        });
        let parsed = parse_course_detail(&doc);
        let run_ids: Vec<_> = parsed.course_runs.iter().map(|r| r.course_run_id.as_str()).collect();
        assert_eq!(run_ids, vec!["R1", "R2"]);
        assert_eq!(parsed.trainers.len(), 1);
        let trainer = &parsed.trainers[0];
        assert_eq!(trainer.course_reference_number, "TGS-9");
        assert_eq!(trainer.course_run_id, "R2");
        assert_eq!(trainer.trainer_uuid, "T-1");
        assert_eq!(trainer.trainer_email, "");
        assert_eq!(parsed.mode_of_trainings.len(), 1);
    }

    #[test]
    fn non_object_inputs_degrade_to_empty_records() {
        for input in [json!(null), json!("text"), json!(42), json!([1, 2]), json!(true)] {
            assert_eq!(parse_course_detail(&input), ParsedDetail::default());
            assert_eq!(parse_course_group(&input), ParsedCourses::default());
        }
    }

    #[test]
    fn wrong_typed_fields_degrade_to_defaults() {
        let doc = json!({
            "courseReferenceNumber": "TGS-5",
            "courseTitle": {"nested": true},
            "qualificationAttained": ["not", "an", "object"],
            "modeOfTrainings": {"description": "x"},
            "courseRuns": "none",
            "relevantJobRoles": ["Chef"],
            "totalTrainingDurationHour": 16.5
        });
        let parsed = parse_course_detail(&doc);
        let details = &parsed.details[0];
        assert_eq!(details.course_reference_number, "TGS-5");
        assert_eq!(details.course_title, "");
        assert_eq!(details.qualification_attained_id, "");
        assert_eq!(details.training_duration_hours, "16.5");
        assert!(parsed.mode_of_trainings.is_empty());
        assert!(parsed.course_runs.is_empty());
        assert!(parsed.job_roles.is_empty());
    }

    #[test]
    fn group_with_missing_doclist_keeps_group_uuid() {
        let parsed = parse_course_group(&json!({"groupValue": "uuid-7", "doclist": []}));
        assert_eq!(parsed.courses.len(), 1);
        assert_eq!(parsed.courses[0].course_uuid, "uuid-7");
        assert_eq!(parsed.courses[0].course_reference_number, "");
        assert!(parsed.training_areas.is_empty());
    }

    #[test]
    fn detail_fixture_preserves_parent_keys_on_children() {
        let response = read_fixture("course-detail/detail.json");
        let doc = detail_document(&response).expect("data member");
        let parsed = parse_course_detail(doc);

        assert_eq!(parsed.details.len(), 1);
        let details = &parsed.details[0];
        assert_eq!(details.course_reference_number, "TGS-2020501234");
        assert_eq!(details.qualification_attained_id, "71");
        assert_eq!(details.qualification_attained_name, "Certificate of Attendance");
        assert_eq!(details.training_days, "2");

        assert_eq!(parsed.course_runs.len(), 2);
        assert_eq!(parsed.course_runs[0].course_intake_size, "20");
        assert_eq!(parsed.course_runs[0].address_postal_code, "189554");
        assert_eq!(parsed.trainers.len(), 2);
        assert!(parsed
            .trainers
            .iter()
            .all(|t| t.course_reference_number == "TGS-2020501234" && t.course_run_id == "436701"));
        assert_eq!(
            parsed.job_roles.iter().map(|j| j.job_role.as_str()).collect::<Vec<_>>(),
            vec!["Chef", "Kitchen Manager"]
        );
        assert_eq!(
            parsed
                .mode_of_trainings
                .iter()
                .map(|m| m.mode_of_training_description.as_str())
                .collect::<Vec<_>>(),
            vec!["Classroom", "Synchronous e-learning"]
        );
    }

    #[test]
    fn detail_document_requires_non_null_data() {
        assert!(detail_document(&json!({"data": {"a": 1}})).is_some());
        assert!(detail_document(&json!({"data": null})).is_none());
        assert!(detail_document(&json!({"status": 404})).is_none());
        assert!(detail_document(&json!("oops")).is_none());
    }

    #[test]
    fn search_groups_distinguishes_empty_from_malformed() {
        let empty = json!({"grouped": {"GroupID": {"groups": []}}});
        assert_eq!(search_groups(&empty).map(<[JsonValue]>::len), Some(0));
        assert!(search_groups(&json!({"response": {}})).is_none());
        assert!(search_groups(&json!({"grouped": {"GroupID": {"groups": {}}}})).is_none());
    }
}
