use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use super::models::{NewAnswer, QuizAttempt, User, UserAnswer, UserProfile};
use crate::error::QuizError;

pub struct Connection {
    pub(super) pool: SqlitePool,
}

impl Connection {
    pub async fn connect(connection_string: &str) -> Result<Self, QuizError> {
        let options = SqliteConnectOptions::from_str(connection_string)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), QuizError> {
        tracing::debug!("Running migrations");
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// A migrated, single-connection in-memory database.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("valid in-memory url")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .expect("in-memory database");
        let connection = Self { pool };
        connection.run_migrations().await.expect("migrations");
        connection
    }
}

pub(crate) type DbResult<T> = Result<T, QuizError>;

pub(crate) trait RegisterUser {
    /// Creates the user on first contact, otherwise refreshes the display
    /// name fields. The registration time never changes.
    async fn upsert_user(&self, profile: &UserProfile, seen_at: DateTime<Utc>) -> DbResult<User>;

    async fn retrieve_user(&self, user_id: i64) -> DbResult<Option<User>>;
}

pub(crate) trait RecordAttempt {
    async fn create_attempt(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        start_time: DateTime<Utc>,
    ) -> DbResult<QuizAttempt>;

    /// Closes an open attempt, scoring it from its recorded answers.
    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        total_questions: usize,
        end_time: DateTime<Utc>,
    ) -> DbResult<QuizAttempt>;

    #[cfg(test)]
    async fn retrieve_attempt(&self, attempt_id: Uuid) -> DbResult<Option<QuizAttempt>>;
}

pub(crate) trait RecordAnswer {
    async fn record_answer(&self, answer: &NewAnswer) -> DbResult<UserAnswer>;

    #[cfg(test)]
    async fn retrieve_answers(&self, attempt_id: Uuid) -> DbResult<Vec<UserAnswer>>;
}

pub(crate) trait PurgeUsers {
    async fn delete_user(&self, user_id: i64) -> DbResult<u64>;

    async fn count_inactive_users(&self, cutoff: DateTime<Utc>) -> DbResult<i64>;

    /// Deletes users registered before `cutoff` that have not started a quiz
    /// since. Attempts and answers go with them.
    async fn purge_inactive_users(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

const USER_COLUMNS: &str = "id, user_id, username, first_name, last_name, joined_date";
const ATTEMPT_COLUMNS: &str = "id, user_id, start_time, end_time, score, total_questions";
const ANSWER_COLUMNS: &str =
    "id, quiz_attempt_id, question_index, question_id, selected_option, is_correct, answer_time";

const INACTIVE_USERS: &str = "FROM users WHERE joined_date < ? AND NOT EXISTS \
    (SELECT 1 FROM quiz_attempts WHERE quiz_attempts.user_id = users.id AND quiz_attempts.start_time >= ?)";

impl RegisterUser for Connection {
    async fn upsert_user(&self, profile: &UserProfile, seen_at: DateTime<Utc>) -> DbResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (user_id, username, first_name, last_name, joined_date) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET \
             username = excluded.username, first_name = excluded.first_name, last_name = excluded.last_name \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(profile.user_id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(seen_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn retrieve_user(&self, user_id: i64) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

impl RecordAttempt for Connection {
    async fn create_attempt(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        start_time: DateTime<Utc>,
    ) -> DbResult<QuizAttempt> {
        let attempt = sqlx::query_as::<_, QuizAttempt>(&format!(
            "INSERT INTO quiz_attempts (id, user_id, start_time) \
             SELECT ?, id, ? FROM users WHERE user_id = ? \
             RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(attempt_id)
        .bind(start_time)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        attempt.ok_or_else(|| QuizError::NotFound(format!("User with ID {user_id}")))
    }

    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        total_questions: usize,
        end_time: DateTime<Utc>,
    ) -> DbResult<QuizAttempt> {
        let attempt = sqlx::query_as::<_, QuizAttempt>(&format!(
            "UPDATE quiz_attempts SET end_time = ?, total_questions = ?, \
             score = (SELECT COUNT(*) FROM user_answers WHERE quiz_attempt_id = ? AND is_correct = 1) \
             WHERE id = ? AND end_time IS NULL \
             RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(end_time)
        .bind(total_questions as i64)
        .bind(attempt_id)
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        attempt.ok_or_else(|| QuizError::NotFound(format!("Open quiz attempt {attempt_id}")))
    }

    #[cfg(test)]
    async fn retrieve_attempt(&self, attempt_id: Uuid) -> DbResult<Option<QuizAttempt>> {
        let attempt = sqlx::query_as::<_, QuizAttempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts WHERE id = ?"
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }
}

impl RecordAnswer for Connection {
    async fn record_answer(&self, answer: &NewAnswer) -> DbResult<UserAnswer> {
        let record = sqlx::query_as::<_, UserAnswer>(&format!(
            "INSERT INTO user_answers \
             (quiz_attempt_id, question_index, question_id, selected_option, is_correct, answer_time) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING {ANSWER_COLUMNS}"
        ))
        .bind(answer.quiz_attempt_id)
        .bind(answer.question_index as i64)
        .bind(answer.question_id)
        .bind(answer.selected_option.map(|option| option as i64))
        .bind(answer.is_correct)
        .bind(answer.answer_time)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    #[cfg(test)]
    async fn retrieve_answers(&self, attempt_id: Uuid) -> DbResult<Vec<UserAnswer>> {
        let answers = sqlx::query_as::<_, UserAnswer>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM user_answers WHERE quiz_attempt_id = ? ORDER BY question_index"
        ))
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(answers)
    }
}

impl PurgeUsers for Connection {
    async fn delete_user(&self, user_id: i64) -> DbResult<u64> {
        let deleted = sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    async fn count_inactive_users(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) {INACTIVE_USERS}"))
            .bind(cutoff)
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn purge_inactive_users(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let deleted = sqlx::query(&format!("DELETE {INACTIVE_USERS}"))
            .bind(cutoff)
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn profile(user_id: i64) -> UserProfile {
        UserProfile {
            user_id,
            username: Some(format!("user{user_id}")),
            first_name: "Ada".to_owned(),
            last_name: None,
        }
    }

    async fn count(connection: &Connection, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&connection.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_refreshes_names_but_keeps_join_date() {
        let connection = Connection::in_memory().await;
        let joined = Utc::now() - Duration::days(3);

        let first = connection.upsert_user(&profile(1), joined).await.unwrap();

        let mut renamed = profile(1);
        renamed.first_name = "Grace".to_owned();
        renamed.last_name = Some("Hopper".to_owned());
        let second = connection.upsert_user(&renamed, Utc::now()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.full_name(), "Grace Hopper");
        assert_eq!(second.joined_date, first.joined_date);
        assert_eq!(count(&connection, "users").await, 1);
    }

    #[tokio::test]
    async fn attempt_for_unknown_user_is_not_found() {
        let connection = Connection::in_memory().await;

        let err = connection
            .create_attempt(Uuid::new_v4(), 99, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, QuizError::NotFound(_)));
    }

    #[tokio::test]
    async fn completion_scores_correct_answers_exactly_once() {
        let connection = Connection::in_memory().await;
        let started = Utc::now();
        connection.upsert_user(&profile(1), started).await.unwrap();
        let attempt = connection
            .create_attempt(Uuid::new_v4(), 1, started)
            .await
            .unwrap();
        assert_eq!(attempt.end_time, None);

        connection
            .record_answer(&NewAnswer::answered(attempt.id, 0, 10, 2, true, Utc::now()))
            .await
            .unwrap();
        connection
            .record_answer(&NewAnswer::timed_out(attempt.id, 1, 11))
            .await
            .unwrap();

        let completed = connection
            .complete_attempt(attempt.id, 2, Utc::now())
            .await
            .unwrap();
        assert_eq!(completed.score, 1);
        assert_eq!(completed.total_questions, 2);
        assert!(completed.end_time.is_some());

        let again = connection.complete_attempt(attempt.id, 5, Utc::now()).await;
        assert!(matches!(again, Err(QuizError::NotFound(_))));
        let stored = connection.retrieve_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored, completed);
    }

    #[tokio::test]
    async fn second_answer_for_the_same_question_is_rejected() {
        let connection = Connection::in_memory().await;
        connection.upsert_user(&profile(1), Utc::now()).await.unwrap();
        let attempt = connection
            .create_attempt(Uuid::new_v4(), 1, Utc::now())
            .await
            .unwrap();

        connection
            .record_answer(&NewAnswer::timed_out(attempt.id, 0, 10))
            .await
            .unwrap();
        let duplicate = connection
            .record_answer(&NewAnswer::answered(attempt.id, 0, 10, 1, false, Utc::now()))
            .await;

        assert!(matches!(duplicate, Err(QuizError::Database(_))));
        let answers = connection.retrieve_answers(attempt.id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].selected_option, None);
        assert_eq!(answers[0].is_correct, Some(false));
        assert_eq!(answers[0].answer_time, None);
    }

    #[tokio::test]
    async fn inactive_cleanup_cascades_and_is_idempotent() {
        let connection = Connection::in_memory().await;
        let long_ago = Utc::now() - Duration::days(60);

        connection.upsert_user(&profile(1), long_ago).await.unwrap();
        let stale = connection
            .create_attempt(Uuid::new_v4(), 1, long_ago)
            .await
            .unwrap();
        connection
            .record_answer(&NewAnswer::answered(stale.id, 0, 10, 0, true, long_ago))
            .await
            .unwrap();
        connection
            .record_answer(&NewAnswer::timed_out(stale.id, 1, 11))
            .await
            .unwrap();

        // Old account, but played recently.
        connection.upsert_user(&profile(2), long_ago).await.unwrap();
        connection
            .create_attempt(Uuid::new_v4(), 2, Utc::now())
            .await
            .unwrap();

        // New account.
        connection.upsert_user(&profile(3), Utc::now()).await.unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        assert_eq!(connection.count_inactive_users(cutoff).await.unwrap(), 1);

        assert_eq!(connection.purge_inactive_users(cutoff).await.unwrap(), 1);
        assert!(connection.retrieve_user(1).await.unwrap().is_none());
        assert!(connection.retrieve_attempt(stale.id).await.unwrap().is_none());
        assert!(connection.retrieve_answers(stale.id).await.unwrap().is_empty());
        assert_eq!(count(&connection, "users").await, 2);
        assert_eq!(count(&connection, "quiz_attempts").await, 1);
        assert_eq!(count(&connection, "user_answers").await, 0);

        assert_eq!(connection.purge_inactive_users(cutoff).await.unwrap(), 0);
        assert_eq!(count(&connection, "users").await, 2);
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_history() {
        let connection = Connection::in_memory().await;
        connection.upsert_user(&profile(1), Utc::now()).await.unwrap();
        let attempt = connection
            .create_attempt(Uuid::new_v4(), 1, Utc::now())
            .await
            .unwrap();
        connection
            .record_answer(&NewAnswer::timed_out(attempt.id, 0, 10))
            .await
            .unwrap();

        assert_eq!(connection.delete_user(1).await.unwrap(), 1);
        assert_eq!(connection.delete_user(1).await.unwrap(), 0);
        assert_eq!(count(&connection, "quiz_attempts").await, 0);
        assert_eq!(count(&connection, "user_answers").await, 0);
    }
}
