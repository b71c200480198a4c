#[cfg(test)]
pub mod test_utils {
    use crate::db::{
        create_course, create_course_task, create_grade_level, create_school_year, create_user,
        get_course_task, get_course_tasks, get_school_for_admin, NewCourseTask,
    };
    use crate::env::AppConfig;
    use crate::error::AppError;
    use crate::init_rocket;
    use crate::models::{Course, CourseTask, DaysOfWeek};
    use chrono::{Duration, NaiveDate, Utc};
    use rocket::http::{ContentType, RawStr, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;
    use uuid::Uuid;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<String>,
        school_years: Vec<TestSchoolYear>,
        grade_levels: Vec<TestGradeLevel>,
        courses: Vec<TestCourse>,
        tasks: Vec<TestTask>,
    }

    pub struct TestSchoolYear {
        pub label: String,
        pub username: String,
        pub start_date: NaiveDate,
        pub end_date: NaiveDate,
    }

    pub struct TestGradeLevel {
        pub name: String,
        pub school_year_label: String,
    }

    pub struct TestCourse {
        pub name: String,
        pub grade_level_name: String,
        pub days_of_week: DaysOfWeek,
    }

    pub struct TestTask {
        pub course_name: String,
        pub description: String,
        pub duration: u32,
        pub is_graded: bool,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn user(mut self, username: &str) -> Self {
            self.users.push(username.to_string());
            self
        }

        pub fn school_year(
            mut self,
            label: &str,
            username: &str,
            start_date: NaiveDate,
            end_date: NaiveDate,
        ) -> Self {
            self.school_years.push(TestSchoolYear {
                label: label.to_string(),
                username: username.to_string(),
                start_date,
                end_date,
            });
            self
        }

        /// A year that has already started and runs for the rest of the term.
        pub fn current_school_year(self, label: &str, username: &str) -> Self {
            let today = Utc::now().date_naive();
            self.school_year(
                label,
                username,
                today - Duration::days(30),
                today + Duration::days(300),
            )
        }

        pub fn grade_level(mut self, name: &str, school_year_label: &str) -> Self {
            self.grade_levels.push(TestGradeLevel {
                name: name.to_string(),
                school_year_label: school_year_label.to_string(),
            });
            self
        }

        pub fn course(self, name: &str, grade_level_name: &str) -> Self {
            self.course_with_days(name, grade_level_name, DaysOfWeek::ALL_DAYS)
        }

        pub fn course_with_days(
            mut self,
            name: &str,
            grade_level_name: &str,
            days_of_week: DaysOfWeek,
        ) -> Self {
            self.courses.push(TestCourse {
                name: name.to_string(),
                grade_level_name: grade_level_name.to_string(),
                days_of_week,
            });
            self
        }

        pub fn task(mut self, course_name: &str, description: &str, duration: u32) -> Self {
            self.tasks.push(TestTask {
                course_name: course_name.to_string(),
                description: description.to_string(),
                duration,
                is_graded: false,
            });
            self
        }

        pub fn graded_task(mut self, course_name: &str, description: &str, duration: u32) -> Self {
            self.tasks.push(TestTask {
                course_name: course_name.to_string(),
                description: description.to_string(),
                duration,
                is_graded: true,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .parse_filters("debug")
                    .is_test(true)
                    .try_init();
            });

            let pool = test_pool().await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut school_year_id_map: HashMap<String, i64> = HashMap::new();
            let mut grade_level_id_map: HashMap<String, i64> = HashMap::new();
            let mut course_map: HashMap<String, Course> = HashMap::new();
            let mut task_map: HashMap<String, CourseTask> = HashMap::new();

            for username in &self.users {
                let user_id = create_user(&pool, username, STANDARD_PASSWORD).await?;
                user_id_map.insert(username.clone(), user_id);
            }

            for year in &self.school_years {
                let user_id = lookup(&user_id_map, &year.username)?;
                let school = get_school_for_admin(&pool, user_id).await?;
                let year_id =
                    create_school_year(&pool, school.id, year.start_date, year.end_date).await?;
                school_year_id_map.insert(year.label.clone(), year_id);
            }

            for grade_level in &self.grade_levels {
                let year_id = lookup(&school_year_id_map, &grade_level.school_year_label)?;
                let grade_level_id = create_grade_level(&pool, year_id, &grade_level.name).await?;
                grade_level_id_map.insert(grade_level.name.clone(), grade_level_id);
            }

            for course in &self.courses {
                let grade_level_id = lookup(&grade_level_id_map, &course.grade_level_name)?;
                let created =
                    create_course(&pool, grade_level_id, &course.name, course.days_of_week)
                        .await?;
                course_map.insert(course.name.clone(), created);
            }

            for task in &self.tasks {
                let course = course_map.get(&task.course_name).ok_or_else(|| {
                    AppError::Internal(format!("Unknown test course {}", task.course_name))
                })?;
                let created = create_course_task(
                    &pool,
                    NewCourseTask {
                        course_id: course.id,
                        description: &task.description,
                        duration: task.duration,
                        is_graded: task.is_graded,
                    },
                    None,
                )
                .await?;
                task_map.insert(task.description.clone(), created);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                course_map,
                task_map,
            })
        }
    }

    fn lookup(map: &HashMap<String, i64>, key: &str) -> Result<i64, AppError> {
        map.get(key)
            .copied()
            .ok_or_else(|| AppError::Internal(format!("Unknown test fixture {}", key)))
    }

    /// In-memory databases live and die with their connection, so the pool
    /// holds exactly one and never recycles it.
    pub async fn test_pool() -> Result<Pool<Sqlite>, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub course_map: HashMap<String, Course>,
        pub task_map: HashMap<String, CourseTask>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn course(&self, name: &str) -> &Course {
            self.course_map
                .get(name)
                .unwrap_or_else(|| panic!("Course {} not in test database", name))
        }

        pub fn task(&self, description: &str) -> &CourseTask {
            self.task_map
                .get(description)
                .unwrap_or_else(|| panic!("Task {} not in test database", description))
        }

        pub fn task_uuid(&self, description: &str) -> Uuid {
            self.task(description).uuid
        }

        pub async fn reload_task(&self, description: &str) -> Result<CourseTask, AppError> {
            get_course_task(&self.pool, self.task(description).id).await
        }

        pub async fn task_descriptions(&self, course_name: &str) -> Vec<String> {
            get_course_tasks(&self.pool, self.course(course_name).id)
                .await
                .expect("Failed to load course tasks")
                .into_iter()
                .map(|task| task.description)
                .collect()
        }

        pub async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count rows")
        }
    }

    /// Two parents with one course each, both in a school year that is in
    /// session today.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .user("parent")
            .user("other_parent")
            .current_school_year("current", "parent")
            .current_school_year("other_current", "other_parent")
            .grade_level("Third Grade", "current")
            .grade_level("Fifth Grade", "other_current")
            .course("Math", "Third Grade")
            .course("Science", "Fifth Grade")
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub fn test_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            session_hours: 1,
            session_sweep_secs: 3600,
            admin: None,
        }
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), test_config()).await;
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str) {
        let response = client
            .post("/accounts/login")
            .header(ContentType::Form)
            .body(form_body(&[
                ("username", username),
                ("password", STANDARD_PASSWORD),
            ]))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Found);
        assert_eq!(response.headers().get_one("Location"), Some("/courses"));
    }

    pub fn form_body(fields: &[(&str, &str)]) -> String {
        fields
            .iter()
            .map(|(name, value)| format!("{}={}", name, RawStr::new(value).percent_encode()))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn location(response: &LocalResponse<'_>) -> String {
        response
            .headers()
            .get_one("Location")
            .unwrap_or_default()
            .to_string()
    }

    pub async fn json_body(response: LocalResponse<'_>) -> serde_json::Value {
        let body = response.into_string().await.expect("response body");
        serde_json::from_str(&body).expect("JSON response body")
    }
}
