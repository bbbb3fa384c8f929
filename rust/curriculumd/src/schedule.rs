//! Curriculum scheduling: spreads a plan's ordered lessons across its date
//! range and classifies the plan against a caller-supplied "today".
//!
//! Everything here is pure. Nothing reads the system clock or the database;
//! the IPC layer resolves both and passes them in.

use chrono::{DateTime, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("{field} is not a valid ISO date: {value:?}")]
    InvalidDate { field: &'static str, value: String },
    #[error("endDate {end} is before startDate {start}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

impl ScheduleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDate { .. } => "invalid_date",
            Self::InvertedRange { .. } => "inverted_range",
        }
    }
}

/// What to do with a plan whose `endDate` precedes its `startDate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangePolicy {
    #[default]
    Reject,
    /// Keep the plan and measure its span by absolute difference.
    Tolerate,
}

impl RangePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "tolerate" => Some(Self::Tolerate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Tolerate => "tolerate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "Preschool (3-5)")]
    Preschool,
    #[default]
    #[serde(rename = "Elementary (6-10)")]
    Elementary,
    #[serde(rename = "Pre-Teen (11-13)")]
    PreTeen,
    #[serde(rename = "Teen (14-17)")]
    Teen,
    #[serde(rename = "Adult (18+)")]
    Adult,
    #[serde(rename = "All Ages")]
    AllAges,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 6] = [
        Self::Preschool,
        Self::Elementary,
        Self::PreTeen,
        Self::Teen,
        Self::Adult,
        Self::AllAges,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Preschool => "Preschool (3-5)",
            Self::Elementary => "Elementary (6-10)",
            Self::PreTeen => "Pre-Teen (11-13)",
            Self::Teen => "Teen (14-17)",
            Self::Adult => "Adult (18+)",
            Self::AllAges => "All Ages",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|g| g.label() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanStatus {
    Upcoming,
    Active,
    Completed,
}

/// The fields of a lesson the scheduler shows next to each slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub passage: String,
    pub theme: String,
    /// Free text such as "45 min".
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedLessonId {
    pub lesson_id: String,
    /// Index into the plan's `lessonIds`.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledLesson {
    pub lesson: Lesson,
    pub week_number: i64,
    #[serde(serialize_with = "serialize_date")]
    pub estimated_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSchedule {
    pub weeks_duration: i64,
    pub status: PlanStatus,
    pub lesson_schedule: Vec<ScheduledLesson>,
    pub unresolved_lesson_ids: Vec<UnresolvedLessonId>,
}

fn serialize_date<S: serde::Serializer>(d: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&d.format(DATE_FORMAT).to_string())
}

/// Parses a plan date. Plain `YYYY-MM-DD` is the stored form; RFC 3339
/// timestamps are reduced to the calendar date they name.
pub fn parse_plan_date(field: &'static str, raw: &str) -> Result<NaiveDate, ScheduleError> {
    let trimmed = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.date_naive());
    }
    Err(ScheduleError::InvalidDate {
        field,
        value: raw.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate, policy: RangePolicy) -> Result<Self, ScheduleError> {
        if end < start && policy == RangePolicy::Reject {
            return Err(ScheduleError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str, policy: RangePolicy) -> Result<Self, ScheduleError> {
        let start = parse_plan_date("startDate", start)?;
        let end = parse_plan_date("endDate", end)?;
        Self::new(start, end, policy)
    }

    pub fn weeks(&self) -> i64 {
        compute_weeks(self.start, self.end)
    }

    pub fn status(&self, today: NaiveDate) -> PlanStatus {
        classify_status(self.start, self.end, today)
    }
}

/// `ceil(|end - start| / 7)` in whole days. Symmetric, never negative.
pub fn compute_weeks(start: NaiveDate, end: NaiveDate) -> i64 {
    let days = (end - start).num_days().abs();
    (days + 6) / 7
}

/// 1-based week label for lesson `index` of `total_lessons` spread over
/// `total_weeks`: `ceil((index + 1) * total_weeks / total_lessons)`.
///
/// Week labels start at 1, so an empty plan and a zero-week plan both put
/// their lessons in week 1. For `total_weeks >= 1` the last lesson lands
/// exactly on `total_weeks`.
pub fn assign_week(index: usize, total_lessons: usize, total_weeks: i64) -> i64 {
    if total_lessons == 0 {
        return 1;
    }
    let n = total_lessons as i64;
    let numerator = (index as i64 + 1) * total_weeks.max(0);
    let week = (numerator + n - 1) / n;
    week.max(1)
}

/// Estimated teaching date: `start + floor(index * total_weeks * 7 / total_lessons)` days.
pub fn assign_date(
    index: usize,
    total_lessons: usize,
    start: NaiveDate,
    total_weeks: i64,
) -> NaiveDate {
    if total_lessons == 0 {
        return start;
    }
    let offset = (index as i64) * total_weeks.max(0) * 7 / total_lessons as i64;
    start
        .checked_add_days(Days::new(offset as u64))
        .unwrap_or(NaiveDate::MAX)
}

pub fn classify_status(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> PlanStatus {
    if today < start {
        PlanStatus::Upcoming
    } else if today <= end {
        PlanStatus::Active
    } else {
        PlanStatus::Completed
    }
}

/// Looks up every id in `lesson_ids`, keeping plan order and duplicates.
/// Fails with every id that has no lesson in `catalog`.
pub fn resolve_lessons<'a>(
    lesson_ids: &[String],
    catalog: &'a [Lesson],
) -> Result<Vec<&'a Lesson>, Vec<UnresolvedLessonId>> {
    let (resolved, unresolved) = resolve_lessons_lenient(lesson_ids, catalog);
    if unresolved.is_empty() {
        Ok(resolved)
    } else {
        Err(unresolved)
    }
}

pub fn resolve_lessons_lenient<'a>(
    lesson_ids: &[String],
    catalog: &'a [Lesson],
) -> (Vec<&'a Lesson>, Vec<UnresolvedLessonId>) {
    let by_id: HashMap<&str, &Lesson> = catalog.iter().map(|l| (l.id.as_str(), l)).collect();
    let mut resolved = Vec::with_capacity(lesson_ids.len());
    let mut unresolved = Vec::new();
    for (position, id) in lesson_ids.iter().enumerate() {
        match by_id.get(id.as_str()) {
            Some(lesson) => resolved.push(*lesson),
            None => unresolved.push(UnresolvedLessonId {
                lesson_id: id.clone(),
                position,
            }),
        }
    }
    (resolved, unresolved)
}

/// Builds the full schedule for a plan. Unresolvable ids are dropped from the
/// schedule and reported in `unresolved_lesson_ids`; only resolved lessons
/// count toward the spread.
pub fn build_schedule(
    range: DateRange,
    lesson_ids: &[String],
    catalog: &[Lesson],
    today: NaiveDate,
) -> PlanSchedule {
    let (resolved, unresolved) = resolve_lessons_lenient(lesson_ids, catalog);
    let weeks = range.weeks();
    let total = resolved.len();
    let lesson_schedule = resolved
        .into_iter()
        .enumerate()
        .map(|(i, lesson)| ScheduledLesson {
            lesson: lesson.clone(),
            week_number: assign_week(i, total, weeks),
            estimated_date: assign_date(i, total, range.start, weeks),
        })
        .collect();
    PlanSchedule {
        weeks_duration: weeks,
        status: range.status(today),
        lesson_schedule,
        unresolved_lesson_ids: unresolved,
    }
}
