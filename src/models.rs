use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct School {
    pub id: i64,
    pub admin_id: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSchool {
    pub id: i64,
    pub admin_id: i64,
}

impl From<DbSchool> for School {
    fn from(school: DbSchool) -> Self {
        Self {
            id: school.id,
            admin_id: school.admin_id,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct SchoolYear {
    pub id: i64,
    pub school_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl SchoolYear {
    /// Both ends of the year are inclusive.
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct GradeLevel {
    pub id: i64,
    pub school_year_id: i64,
    pub name: String,
}

/// Weekdays a course runs on, stored as a bitmask in `courses.days_of_week`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const NO_DAYS: DaysOfWeek = DaysOfWeek(0);
    pub const SUNDAY: DaysOfWeek = DaysOfWeek(1);
    pub const MONDAY: DaysOfWeek = DaysOfWeek(2);
    pub const TUESDAY: DaysOfWeek = DaysOfWeek(4);
    pub const WEDNESDAY: DaysOfWeek = DaysOfWeek(8);
    pub const THURSDAY: DaysOfWeek = DaysOfWeek(16);
    pub const FRIDAY: DaysOfWeek = DaysOfWeek(32);
    pub const SATURDAY: DaysOfWeek = DaysOfWeek(64);
    pub const ALL_DAYS: DaysOfWeek = DaysOfWeek(127);

    const NAMED: [(DaysOfWeek, &'static str); 7] = [
        (Self::SUNDAY, "Sunday"),
        (Self::MONDAY, "Monday"),
        (Self::TUESDAY, "Tuesday"),
        (Self::WEDNESDAY, "Wednesday"),
        (Self::THURSDAY, "Thursday"),
        (Self::FRIDAY, "Friday"),
        (Self::SATURDAY, "Saturday"),
    ];

    /// Unknown high bits are dropped.
    pub fn from_bits(bits: i64) -> Self {
        DaysOfWeek((bits & i64::from(Self::ALL_DAYS.0)) as u8)
    }

    pub fn bits(self) -> i64 {
        i64::from(self.0)
    }

    pub fn contains(self, other: DaysOfWeek) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(day, _)| self.contains(*day))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::ops::BitOr for DaysOfWeek {
    type Output = DaysOfWeek;

    fn bitor(self, rhs: Self) -> Self::Output {
        DaysOfWeek(self.0 | rhs.0)
    }
}

impl std::ops::Add for DaysOfWeek {
    type Output = DaysOfWeek;

    fn add(self, rhs: Self) -> Self::Output {
        self | rhs
    }
}

impl fmt::Display for DaysOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NO_DAYS => write!(f, "No days"),
            Self::ALL_DAYS => write!(f, "All days"),
            days => write!(f, "{}", days.names().join(", ")),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Course {
    pub id: i64,
    pub uuid: Uuid,
    pub grade_level_id: i64,
    pub name: String,
    pub days_of_week: DaysOfWeek,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCourse {
    pub id: i64,
    pub uuid: Uuid,
    pub grade_level_id: i64,
    pub name: String,
    pub days_of_week: i64,
}

impl From<DbCourse> for Course {
    fn from(course: DbCourse) -> Self {
        Self {
            id: course.id,
            uuid: course.uuid,
            grade_level_id: course.grade_level_id,
            name: course.name,
            days_of_week: DaysOfWeek::from_bits(course.days_of_week),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CourseTask {
    pub id: i64,
    pub uuid: Uuid,
    pub course_id: i64,
    pub description: String,
    pub duration: u32,
    pub position: i64,
    pub is_graded: bool,
}

/// Rows are selected with a `LEFT JOIN graded_works` so `graded_work_id`
/// tells whether the task is graded.
#[derive(sqlx::FromRow, Clone)]
pub struct DbCourseTask {
    pub id: i64,
    pub uuid: Uuid,
    pub course_id: i64,
    pub description: String,
    pub duration: i64,
    pub position: i64,
    pub graded_work_id: Option<i64>,
}

impl From<DbCourseTask> for CourseTask {
    fn from(task: DbCourseTask) -> Self {
        Self {
            id: task.id,
            uuid: task.uuid,
            course_id: task.course_id,
            description: task.description,
            duration: u32::try_from(task.duration).unwrap_or_default(),
            position: task.position,
            is_graded: task.graded_work_id.is_some(),
        }
    }
}
