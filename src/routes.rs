use chrono::Utc;
use rocket::State;
use rocket::form::Form;
use rocket::response::Redirect;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::User;
use crate::db::{
    NewCourseTask, create_course_task, delete_course_task, get_course, get_course_task_in_course,
    get_course_tasks, get_courses_for_grade_level, get_current_school_year, get_grade_level,
    get_grade_levels, update_course, update_course_task,
};
use crate::error::AppError;
use crate::models::{Course, CourseTask, DaysOfWeek, GradeLevel, SchoolYear};
use crate::validation::{AppErrorExt, FormValidateExt, ValidationResponse, safe_next};

type FormResult = Result<Redirect, Custom<Json<ValidationResponse>>>;

pub fn course_detail_url(course: &Course) -> String {
    format!("/courses/{}", course.uuid)
}

fn redirect_next_or(next: Option<&str>, fallback: String) -> Redirect {
    Redirect::found(safe_next(next).map(str::to_string).unwrap_or(fallback))
}

#[derive(Serialize)]
pub struct GradeLevelCourses {
    pub grade_level: GradeLevel,
    pub courses: Vec<Course>,
}

#[derive(Serialize)]
pub struct CourseListResponse {
    pub school_year: Option<SchoolYear>,
    pub grade_levels: Vec<GradeLevelCourses>,
}

/// Courses of the school year that is in session today.
#[get("/courses")]
pub async fn course_list(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseListResponse>, AppError> {
    let school = user.school(db).await?;
    let today = Utc::now().date_naive();

    let Some(school_year) = get_current_school_year(db, school.id, today).await? else {
        return Ok(Json(CourseListResponse {
            school_year: None,
            grade_levels: Vec::new(),
        }));
    };

    let mut grade_levels = Vec::new();
    for grade_level in get_grade_levels(db, school_year.id).await? {
        let courses = get_courses_for_grade_level(db, grade_level.id).await?;
        grade_levels.push(GradeLevelCourses {
            grade_level,
            courses,
        });
    }

    Ok(Json(CourseListResponse {
        school_year: Some(school_year),
        grade_levels,
    }))
}

#[derive(Serialize)]
pub struct CourseDetailResponse {
    pub course: Course,
    pub grade_level: GradeLevel,
    pub days: Vec<&'static str>,
    pub tasks: Vec<CourseTask>,
}

#[get("/courses/<uuid>")]
pub async fn course_detail(
    uuid: Uuid,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseDetailResponse>, AppError> {
    let course = user.require_course(db, uuid).await?;
    let grade_level = get_grade_level(db, course.grade_level_id).await?;
    let tasks = get_course_tasks(db, course.id).await?;

    Ok(Json(CourseDetailResponse {
        days: course.days_of_week.names(),
        course,
        grade_level,
        tasks,
    }))
}

#[derive(Serialize)]
pub struct CourseEditResponse {
    pub course: Course,
    pub days: Vec<&'static str>,
}

#[get("/courses/<uuid>/edit")]
pub async fn course_edit(
    uuid: Uuid,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseEditResponse>, AppError> {
    let course = user.require_course(db, uuid).await?;

    Ok(Json(CourseEditResponse {
        days: course.days_of_week.names(),
        course,
    }))
}

/// Weekday checkboxes submit `on` when ticked and are absent otherwise.
#[derive(FromForm, Validate)]
pub struct CourseForm {
    #[validate(length(min = 1, max = 256, message = "Course name must be 1 to 256 characters"))]
    name: String,
    sunday: bool,
    monday: bool,
    tuesday: bool,
    wednesday: bool,
    thursday: bool,
    friday: bool,
    saturday: bool,
}

impl CourseForm {
    pub fn days_of_week(&self) -> DaysOfWeek {
        [
            (self.sunday, DaysOfWeek::SUNDAY),
            (self.monday, DaysOfWeek::MONDAY),
            (self.tuesday, DaysOfWeek::TUESDAY),
            (self.wednesday, DaysOfWeek::WEDNESDAY),
            (self.thursday, DaysOfWeek::THURSDAY),
            (self.friday, DaysOfWeek::FRIDAY),
            (self.saturday, DaysOfWeek::SATURDAY),
        ]
        .into_iter()
        .filter(|(checked, _)| *checked)
        .fold(DaysOfWeek::NO_DAYS, |days, (_, day)| days | day)
    }
}

#[post("/courses/<uuid>/edit", data = "<form>")]
pub async fn course_update(
    uuid: Uuid,
    form: Form<CourseForm>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> FormResult {
    let course = user.require_course(db, uuid).await.validate_custom()?;
    let form = form.validate_custom()?;

    update_course(db, course.id, &form.name, form.days_of_week())
        .await
        .validate_custom()?;

    info!(course = %course.uuid, "Course updated");
    Ok(Redirect::found(course_detail_url(&course)))
}

#[derive(FromForm, Validate)]
pub struct CourseTaskForm {
    #[validate(length(min = 1, message = "A task needs a description"))]
    description: String,
    duration: u32,
    is_graded: bool,
}

#[derive(Serialize)]
pub struct TaskCreateResponse {
    pub create: bool,
    pub course: Course,
    pub previous_task: Option<CourseTask>,
}

/// Reference task for ordered inserts. Only tasks of the same course count.
async fn resolve_previous_task(
    db: &Pool<Sqlite>,
    course: &Course,
    previous_task: Option<&str>,
) -> Result<Option<CourseTask>, AppError> {
    match previous_task.and_then(|raw| Uuid::parse_str(raw).ok()) {
        Some(uuid) => get_course_task_in_course(db, course.id, uuid).await,
        None => Ok(None),
    }
}

#[get("/courses/<uuid>/tasks/new?<previous_task>")]
pub async fn task_create_form(
    uuid: Uuid,
    previous_task: Option<&str>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<TaskCreateResponse>, AppError> {
    let course = user.require_course(db, uuid).await?;
    let previous_task = resolve_previous_task(db, &course, previous_task).await?;

    Ok(Json(TaskCreateResponse {
        create: true,
        course,
        previous_task,
    }))
}

#[post("/courses/<uuid>/tasks/new?<next>&<previous_task>", data = "<form>")]
pub async fn task_create(
    uuid: Uuid,
    next: Option<&str>,
    previous_task: Option<&str>,
    form: Form<CourseTaskForm>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> FormResult {
    let course = user.require_course(db, uuid).await.validate_custom()?;
    let form = form.validate_custom()?;
    let after = resolve_previous_task(db, &course, previous_task)
        .await
        .validate_custom()?;

    let task = create_course_task(
        db,
        NewCourseTask {
            course_id: course.id,
            description: &form.description,
            duration: form.duration,
            is_graded: form.is_graded,
        },
        after.map(|task| task.id),
    )
    .await
    .validate_custom()?;

    info!(course = %course.uuid, task = %task.uuid, position = task.position, "Course task created");
    Ok(redirect_next_or(next, course_detail_url(&course)))
}

#[derive(Serialize)]
pub struct TaskEditResponse {
    pub course: Course,
    pub task: CourseTask,
}

async fn task_with_course(
    db: &Pool<Sqlite>,
    user: &User,
    uuid: Uuid,
) -> Result<(Course, CourseTask), AppError> {
    let task = user.require_course_task(db, uuid).await?;
    let course = get_course(db, task.course_id).await?;
    Ok((course, task))
}

#[get("/tasks/<uuid>")]
pub async fn task_edit_form(
    uuid: Uuid,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<TaskEditResponse>, AppError> {
    let (course, task) = task_with_course(db, &user, uuid).await?;
    Ok(Json(TaskEditResponse { course, task }))
}

#[post("/tasks/<uuid>?<next>", data = "<form>")]
pub async fn task_update(
    uuid: Uuid,
    next: Option<&str>,
    form: Form<CourseTaskForm>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> FormResult {
    let (course, task) = task_with_course(db, &user, uuid)
        .await
        .validate_custom()?;
    let form = form.validate_custom()?;

    update_course_task(db, task.id, &form.description, form.duration, form.is_graded)
        .await
        .validate_custom()?;

    info!(task = %task.uuid, is_graded = form.is_graded, "Course task updated");
    Ok(redirect_next_or(next, course_detail_url(&course)))
}

async fn task_in_owned_course(
    db: &Pool<Sqlite>,
    user: &User,
    uuid: Uuid,
    task_uuid: Uuid,
) -> Result<(Course, CourseTask), AppError> {
    let course = user.require_course(db, uuid).await?;
    match get_course_task_in_course(db, course.id, task_uuid).await? {
        Some(task) => Ok((course, task)),
        None => Err(AppError::NotFound(format!(
            "Course task {} in course {}",
            task_uuid, uuid
        ))),
    }
}

#[get("/courses/<uuid>/tasks/<task_uuid>/delete")]
pub async fn task_delete_confirm(
    uuid: Uuid,
    task_uuid: Uuid,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<TaskEditResponse>, AppError> {
    let (course, task) = task_in_owned_course(db, &user, uuid, task_uuid).await?;
    Ok(Json(TaskEditResponse { course, task }))
}

#[post("/courses/<uuid>/tasks/<task_uuid>/delete")]
pub async fn task_delete(
    uuid: Uuid,
    task_uuid: Uuid,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Redirect, AppError> {
    let (course, task) = task_in_owned_course(db, &user, uuid, task_uuid).await?;

    delete_course_task(db, task.id).await?;

    info!(course = %course.uuid, task = %task.uuid, "Course task deleted");
    Ok(Redirect::found(course_detail_url(&course)))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
