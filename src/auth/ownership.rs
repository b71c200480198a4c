use sqlx::{Pool, Sqlite};
use tracing::warn;
use uuid::Uuid;

use crate::db::{get_course_for_admin, get_course_task_for_admin, get_school_for_admin};
use crate::error::AppError;
use crate::models::{Course, CourseTask, School};

use super::User;

/// Access to courses and tasks is granted only to the admin of the school
/// at the top of the ownership chain. Anything else, including a uuid that
/// does not exist, is reported as `NotFound` so other schools' records stay
/// invisible.
impl User {
    pub async fn school(&self, pool: &Pool<Sqlite>) -> Result<School, AppError> {
        get_school_for_admin(pool, self.id).await
    }

    pub async fn require_course(&self, pool: &Pool<Sqlite>, uuid: Uuid) -> Result<Course, AppError> {
        match get_course_for_admin(pool, uuid, self.id).await? {
            Some(course) => Ok(course),
            None => {
                warn!(username = %self.username, course = %uuid, "Course not available to user");
                Err(AppError::NotFound(format!("Course {}", uuid)))
            }
        }
    }

    pub async fn require_course_task(
        &self,
        pool: &Pool<Sqlite>,
        uuid: Uuid,
    ) -> Result<CourseTask, AppError> {
        match get_course_task_for_admin(pool, uuid, self.id).await? {
            Some(task) => Ok(task),
            None => {
                warn!(username = %self.username, task = %uuid, "Course task not available to user");
                Err(AppError::NotFound(format!("Course task {}", uuid)))
            }
        }
    }
}
