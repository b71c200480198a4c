use crate::{
    auth::{DbUser, DbUserSession, User, UserSession},
    error::AppError,
    models::{
        Course, CourseTask, DaysOfWeek, DbCourse, DbCourseTask, DbSchool, GradeLevel, School,
        SchoolYear,
    },
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

#[cfg(not(test))]
const PASSWORD_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_COST: u32 = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const COURSE_COLUMNS: &str = "c.id, c.uuid, c.grade_level_id, c.name, c.days_of_week";

const TASK_SELECT: &str = "SELECT t.id, t.uuid, t.course_id, t.description, t.duration, t.position,
        g.id AS graded_work_id
     FROM course_tasks t
     LEFT JOIN graded_works g ON g.course_task_id = t.id";

/// Writers queue on the database lock for up to `BUSY_TIMEOUT`. Every
/// read-then-write transaction below opens with `BEGIN IMMEDIATE` so it takes
/// that lock before its first read.
pub fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, AppError> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT))
}

// Users and sessions

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>("SELECT id, username FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>("SELECT id, username FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(User::from))
}

/// Every user administers exactly one school, so the school is created with
/// the account.
#[instrument(skip_all, fields(username = %username))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let hashed_password = bcrypt::hash(password, PASSWORD_COST)?;

    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let existing_user = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *tx)
        .await?;

    if existing_user.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let user_id = sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
        .bind(username)
        .bind(hashed_password)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    sqlx::query("INSERT INTO schools (admin_id) VALUES (?)")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(user_id)
}

#[instrument(skip_all, fields(username = %username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    #[derive(sqlx::FromRow)]
    struct Credentials {
        id: i64,
        username: String,
        password: String,
    }

    let row = sqlx::query_as::<_, Credentials>(
        "SELECT id, username, password FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => match bcrypt::verify(password, &row.password) {
            Ok(true) => Ok(Some(User {
                id: row.id,
                username: row.username,
            })),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Creates the configured admin account on first launch. Returns whether a
/// new account was created.
#[instrument(skip_all, fields(username = %username))]
pub async fn ensure_admin(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<bool, AppError> {
    if find_user_by_username(pool, username).await?.is_some() {
        return Ok(false);
    }

    create_user(pool, username, password).await?;
    info!("Created admin account");
    Ok(true)
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// Schools, school years and grade levels

#[instrument]
pub async fn get_school_for_admin(pool: &Pool<Sqlite>, admin_id: i64) -> Result<School, AppError> {
    let row = sqlx::query_as::<_, DbSchool>("SELECT id, admin_id FROM schools WHERE admin_id = ?")
        .bind(admin_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(school) => Ok(School::from(school)),
        _ => Err(AppError::NotFound(format!(
            "No school administered by user {}",
            admin_id
        ))),
    }
}

#[cfg(test)]
#[instrument]
pub async fn create_school_year(
    pool: &Pool<Sqlite>,
    school_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<i64, AppError> {
    info!("Creating school year");
    if end_date < start_date {
        return Err(AppError::Validation(
            "A school year cannot end before it starts".to_string(),
        ));
    }

    let res = sqlx::query(
        "INSERT INTO school_years (school_id, start_date, end_date) VALUES (?, ?, ?)",
    )
    .bind(school_id)
    .bind(start_date)
    .bind(end_date)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

/// The year whose window contains `today`. Overlapping years resolve to the
/// one that started last.
#[instrument]
pub async fn get_current_school_year(
    pool: &Pool<Sqlite>,
    school_id: i64,
    today: NaiveDate,
) -> Result<Option<SchoolYear>, AppError> {
    let years = sqlx::query_as::<_, SchoolYear>(
        "SELECT id, school_id, start_date, end_date FROM school_years
         WHERE school_id = ?
         ORDER BY start_date DESC, id DESC",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(years.into_iter().find(|year| year.contains(today)))
}

#[cfg(test)]
#[instrument]
pub async fn create_grade_level(
    pool: &Pool<Sqlite>,
    school_year_id: i64,
    name: &str,
) -> Result<i64, AppError> {
    info!("Creating grade level");
    let res = sqlx::query("INSERT INTO grade_levels (school_year_id, name) VALUES (?, ?)")
        .bind(school_year_id)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_grade_level(pool: &Pool<Sqlite>, id: i64) -> Result<GradeLevel, AppError> {
    let row = sqlx::query_as::<_, GradeLevel>(
        "SELECT id, school_year_id, name FROM grade_levels WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("Grade level {} not found", id)))
}

#[instrument]
pub async fn get_grade_levels(
    pool: &Pool<Sqlite>,
    school_year_id: i64,
) -> Result<Vec<GradeLevel>, AppError> {
    let rows = sqlx::query_as::<_, GradeLevel>(
        "SELECT id, school_year_id, name FROM grade_levels
         WHERE school_year_id = ?
         ORDER BY id",
    )
    .bind(school_year_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// Courses

#[cfg(test)]
#[instrument]
pub async fn create_course(
    pool: &Pool<Sqlite>,
    grade_level_id: i64,
    name: &str,
    days_of_week: DaysOfWeek,
) -> Result<Course, AppError> {
    info!("Creating course");
    let uuid = Uuid::new_v4();
    let res = sqlx::query(
        "INSERT INTO courses (uuid, grade_level_id, name, days_of_week) VALUES (?, ?, ?, ?)",
    )
    .bind(uuid)
    .bind(grade_level_id)
    .bind(name)
    .bind(days_of_week.bits())
    .execute(pool)
    .await?;

    Ok(Course {
        id: res.last_insert_rowid(),
        uuid,
        grade_level_id,
        name: name.to_string(),
        days_of_week,
    })
}

#[instrument]
pub async fn get_courses_for_grade_level(
    pool: &Pool<Sqlite>,
    grade_level_id: i64,
) -> Result<Vec<Course>, AppError> {
    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses c WHERE c.grade_level_id = ? ORDER BY c.id"
    ))
    .bind(grade_level_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument]
pub async fn get_course(pool: &Pool<Sqlite>, id: i64) -> Result<Course, AppError> {
    let row = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses c WHERE c.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Course::from)
        .ok_or_else(|| AppError::NotFound(format!("Course {} not found", id)))
}

/// Resolves a course through grade level, school year and school, keeping it
/// only when `admin_id` runs that school.
#[instrument]
pub async fn get_course_for_admin(
    pool: &Pool<Sqlite>,
    uuid: Uuid,
    admin_id: i64,
) -> Result<Option<Course>, AppError> {
    let row = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses c
         JOIN grade_levels gl ON gl.id = c.grade_level_id
         JOIN school_years sy ON sy.id = gl.school_year_id
         JOIN schools s ON s.id = sy.school_id
         WHERE c.uuid = ? AND s.admin_id = ?"
    ))
    .bind(uuid)
    .bind(admin_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Course::from))
}

#[instrument]
pub async fn update_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    name: &str,
    days_of_week: DaysOfWeek,
) -> Result<(), AppError> {
    info!("Updating course");
    sqlx::query("UPDATE courses SET name = ?, days_of_week = ? WHERE id = ?")
        .bind(name)
        .bind(days_of_week.bits())
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(())
}

// Course tasks

#[derive(Debug, Clone)]
pub struct NewCourseTask<'a> {
    pub course_id: i64,
    pub description: &'a str,
    pub duration: u32,
    pub is_graded: bool,
}

#[instrument]
pub async fn get_course_tasks(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<CourseTask>, AppError> {
    let rows = sqlx::query_as::<_, DbCourseTask>(&format!(
        "{TASK_SELECT} WHERE t.course_id = ? ORDER BY t.position, t.id"
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(CourseTask::from).collect())
}

#[instrument]
pub async fn get_course_task(pool: &Pool<Sqlite>, id: i64) -> Result<CourseTask, AppError> {
    let row = sqlx::query_as::<_, DbCourseTask>(&format!("{TASK_SELECT} WHERE t.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(CourseTask::from)
        .ok_or_else(|| AppError::NotFound(format!("Course task {} not found", id)))
}

#[instrument]
pub async fn get_course_task_in_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    uuid: Uuid,
) -> Result<Option<CourseTask>, AppError> {
    let row = sqlx::query_as::<_, DbCourseTask>(&format!(
        "{TASK_SELECT} WHERE t.course_id = ? AND t.uuid = ?"
    ))
    .bind(course_id)
    .bind(uuid)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CourseTask::from))
}

#[instrument]
pub async fn get_course_task_for_admin(
    pool: &Pool<Sqlite>,
    uuid: Uuid,
    admin_id: i64,
) -> Result<Option<CourseTask>, AppError> {
    let row = sqlx::query_as::<_, DbCourseTask>(&format!(
        "{TASK_SELECT}
         JOIN courses c ON c.id = t.course_id
         JOIN grade_levels gl ON gl.id = c.grade_level_id
         JOIN school_years sy ON sy.id = gl.school_year_id
         JOIN schools s ON s.id = sy.school_id
         WHERE t.uuid = ? AND s.admin_id = ?"
    ))
    .bind(uuid)
    .bind(admin_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CourseTask::from))
}

/// Appends the task to its course, or places it right after `after_task_id`
/// when that task belongs to the same course. Later siblings shift down one
/// position inside the same transaction.
#[instrument]
pub async fn create_course_task(
    pool: &Pool<Sqlite>,
    task: NewCourseTask<'_>,
    after_task_id: Option<i64>,
) -> Result<CourseTask, AppError> {
    info!("Creating course task");
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let after_position = match after_task_id {
        Some(after_id) => {
            sqlx::query_scalar::<_, i64>(
                "SELECT position FROM course_tasks WHERE id = ? AND course_id = ?",
            )
            .bind(after_id)
            .bind(task.course_id)
            .fetch_optional(&mut *tx)
            .await?
        }
        None => None,
    };

    let position = match after_position {
        Some(after_position) => {
            sqlx::query(
                "UPDATE course_tasks SET position = position + 1
                 WHERE course_id = ? AND position > ?",
            )
            .bind(task.course_id)
            .bind(after_position)
            .execute(&mut *tx)
            .await?;
            after_position + 1
        }
        None => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM course_tasks WHERE course_id = ?",
            )
            .bind(task.course_id)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    let task_id = sqlx::query(
        "INSERT INTO course_tasks (uuid, course_id, description, duration, position)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(task.course_id)
    .bind(task.description)
    .bind(i64::from(task.duration))
    .bind(position)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    if task.is_graded {
        sqlx::query("INSERT INTO graded_works (course_task_id) VALUES (?)")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    get_course_task(pool, task_id).await
}

/// Grading is idempotent: marking an already graded task keeps its single
/// graded work, unmarking deletes it.
#[instrument]
pub async fn update_course_task(
    pool: &Pool<Sqlite>,
    task_id: i64,
    description: &str,
    duration: u32,
    is_graded: bool,
) -> Result<(), AppError> {
    info!("Updating course task");
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    sqlx::query("UPDATE course_tasks SET description = ?, duration = ? WHERE id = ?")
        .bind(description)
        .bind(i64::from(duration))
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    if is_graded {
        sqlx::query("INSERT OR IGNORE INTO graded_works (course_task_id) VALUES (?)")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
    } else {
        sqlx::query("DELETE FROM graded_works WHERE course_task_id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(())
}

/// Deletes the task and closes the gap it leaves in the course order.
#[instrument]
pub async fn delete_course_task(pool: &Pool<Sqlite>, task_id: i64) -> Result<(), AppError> {
    info!("Deleting course task");
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    #[derive(sqlx::FromRow)]
    struct Removed {
        course_id: i64,
        position: i64,
    }

    let removed = sqlx::query_as::<_, Removed>(
        "DELETE FROM course_tasks WHERE id = ? RETURNING course_id, position",
    )
    .bind(task_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(removed) = removed else {
        return Err(AppError::NotFound(format!(
            "Course task {} not found",
            task_id
        )));
    };

    sqlx::query(
        "UPDATE course_tasks SET position = position - 1
         WHERE course_id = ? AND position > ?",
    )
    .bind(removed.course_id)
    .bind(removed.position)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}
