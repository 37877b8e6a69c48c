use chrono::{DateTime, Utc};

use super::{
    connection::{Connection, DbResult, RegisterUser},
    models::User,
};

/// What a user sees for `/stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSummary {
    pub user: User,
    pub total_attempts: i64,
    pub completed: i64,
    pub best: Option<BestScore>,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct BestScore {
    pub score: i64,
    pub total_questions: i64,
}

/// What an admin sees for `/user_stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDetails {
    pub user: User,
    pub total_attempts: i64,
    pub completed: i64,
    pub average_score: f64,
    pub best_score: i64,
    pub questions_answered: i64,
    pub correct_answers: i64,
    pub accuracy: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStats {
    pub total_users: i64,
    pub new_users: i64,
    pub total_quizzes: i64,
    pub completed_quizzes: i64,
    pub recent_quizzes: i64,
    pub average_score: f64,
    pub total_answers: i64,
    pub correct_answers: i64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentUsers {
    pub total: i64,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ActiveUser {
    #[sqlx(flatten)]
    pub user: User,
    pub quiz_count: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TopScore {
    pub first_name: String,
    pub last_name: Option<String>,
    pub score: i64,
    pub total_questions: i64,
}

#[derive(sqlx::FromRow)]
struct AttemptTotals {
    total_attempts: i64,
    completed: i64,
    completed_score: i64,
    completed_questions: i64,
    best_score: i64,
}

#[derive(sqlx::FromRow)]
struct AnswerTotals {
    answered: i64,
    correct: i64,
}

#[derive(sqlx::FromRow)]
struct GlobalTotals {
    total_users: i64,
    new_users: i64,
    total_quizzes: i64,
    completed_quizzes: i64,
    recent_quizzes: i64,
    completed_score: i64,
    total_answers: i64,
    correct_answers: i64,
}

pub(crate) trait RetrieveStats {
    /// `None` when the user never talked to the bot.
    async fn user_summary(&self, user_id: i64) -> DbResult<Option<UserSummary>>;

    async fn user_details(&self, user_id: i64) -> DbResult<Option<UserDetails>>;

    /// Totals, with "new" and "recent" counted from `since`.
    async fn global_stats(&self, since: DateTime<Utc>) -> DbResult<GlobalStats>;

    async fn recent_users(&self, limit: i64) -> DbResult<RecentUsers>;

    async fn most_active_users(&self, limit: i64) -> DbResult<Vec<ActiveUser>>;

    async fn top_scores(&self, limit: i64) -> DbResult<Vec<TopScore>>;
}

pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

fn average(sum: i64, count: i64) -> f64 {
    if count > 0 {
        sum as f64 / count as f64
    } else {
        0.0
    }
}

impl Connection {
    async fn attempt_totals(&self, user: &User) -> DbResult<AttemptTotals> {
        let totals = sqlx::query_as::<_, AttemptTotals>(
            "SELECT COUNT(*) AS total_attempts, \
             COUNT(end_time) AS completed, \
             COALESCE(SUM(CASE WHEN end_time IS NOT NULL THEN score END), 0) AS completed_score, \
             COALESCE(SUM(CASE WHEN end_time IS NOT NULL THEN total_questions END), 0) AS completed_questions, \
             COALESCE(MAX(CASE WHEN end_time IS NOT NULL THEN score END), 0) AS best_score \
             FROM quiz_attempts WHERE user_id = ?",
        )
        .bind(user.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }
}

impl RetrieveStats for Connection {
    async fn user_summary(&self, user_id: i64) -> DbResult<Option<UserSummary>> {
        let Some(user) = self.retrieve_user(user_id).await? else {
            return Ok(None);
        };

        let totals = self.attempt_totals(&user).await?;
        let best = sqlx::query_as::<_, BestScore>(
            "SELECT score, total_questions FROM quiz_attempts \
             WHERE user_id = ? AND end_time IS NOT NULL \
             ORDER BY score DESC, start_time ASC LIMIT 1",
        )
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(UserSummary {
            user,
            total_attempts: totals.total_attempts,
            completed: totals.completed,
            best,
            accuracy: percentage(totals.completed_score, totals.completed_questions),
        }))
    }

    async fn user_details(&self, user_id: i64) -> DbResult<Option<UserDetails>> {
        let Some(user) = self.retrieve_user(user_id).await? else {
            return Ok(None);
        };

        let totals = self.attempt_totals(&user).await?;
        let answers = sqlx::query_as::<_, AnswerTotals>(
            "SELECT COUNT(*) AS answered, \
             COALESCE(SUM(CASE WHEN user_answers.is_correct = 1 THEN 1 ELSE 0 END), 0) AS correct \
             FROM user_answers JOIN quiz_attempts ON quiz_attempts.id = user_answers.quiz_attempt_id \
             WHERE quiz_attempts.user_id = ?",
        )
        .bind(user.id)
        .fetch_one(&self.pool)
        .await?;
        let last_activity = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT start_time FROM quiz_attempts WHERE user_id = ? ORDER BY start_time DESC LIMIT 1",
        )
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(UserDetails {
            user,
            total_attempts: totals.total_attempts,
            completed: totals.completed,
            average_score: average(totals.completed_score, totals.completed),
            best_score: totals.best_score,
            questions_answered: answers.answered,
            correct_answers: answers.correct,
            accuracy: percentage(answers.correct, answers.answered),
            last_activity,
        }))
    }

    async fn global_stats(&self, since: DateTime<Utc>) -> DbResult<GlobalStats> {
        let totals = sqlx::query_as::<_, GlobalTotals>(
            "SELECT \
             (SELECT COUNT(*) FROM users) AS total_users, \
             (SELECT COUNT(*) FROM users WHERE joined_date >= ?) AS new_users, \
             (SELECT COUNT(*) FROM quiz_attempts) AS total_quizzes, \
             (SELECT COUNT(*) FROM quiz_attempts WHERE end_time IS NOT NULL) AS completed_quizzes, \
             (SELECT COUNT(*) FROM quiz_attempts WHERE start_time >= ?) AS recent_quizzes, \
             (SELECT COALESCE(SUM(score), 0) FROM quiz_attempts WHERE end_time IS NOT NULL) AS completed_score, \
             (SELECT COUNT(*) FROM user_answers) AS total_answers, \
             (SELECT COUNT(*) FROM user_answers WHERE is_correct = 1) AS correct_answers",
        )
        .bind(since)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(GlobalStats {
            total_users: totals.total_users,
            new_users: totals.new_users,
            total_quizzes: totals.total_quizzes,
            completed_quizzes: totals.completed_quizzes,
            recent_quizzes: totals.recent_quizzes,
            average_score: average(totals.completed_score, totals.completed_quizzes),
            total_answers: totals.total_answers,
            correct_answers: totals.correct_answers,
            accuracy: percentage(totals.correct_answers, totals.total_answers),
        })
    }

    async fn recent_users(&self, limit: i64) -> DbResult<RecentUsers> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let users = sqlx::query_as::<_, User>(
            "SELECT id, user_id, username, first_name, last_name, joined_date \
             FROM users ORDER BY joined_date DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(RecentUsers { total, users })
    }

    async fn most_active_users(&self, limit: i64) -> DbResult<Vec<ActiveUser>> {
        let users = sqlx::query_as::<_, ActiveUser>(
            "SELECT users.id, users.user_id, users.username, users.first_name, users.last_name, \
             users.joined_date, COUNT(quiz_attempts.id) AS quiz_count \
             FROM users JOIN quiz_attempts ON quiz_attempts.user_id = users.id \
             GROUP BY users.id ORDER BY quiz_count DESC, users.id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn top_scores(&self, limit: i64) -> DbResult<Vec<TopScore>> {
        let scores = sqlx::query_as::<_, TopScore>(
            "SELECT users.first_name, users.last_name, quiz_attempts.score, quiz_attempts.total_questions \
             FROM quiz_attempts JOIN users ON users.id = quiz_attempts.user_id \
             WHERE quiz_attempts.end_time IS NOT NULL \
             ORDER BY quiz_attempts.score DESC, quiz_attempts.end_time ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::database::{
        connection::{RecordAnswer, RecordAttempt},
        models::{NewAnswer, UserProfile},
    };

    /// Plays one complete attempt with `correct` right answers out of `total`.
    async fn play(connection: &Connection, user_id: i64, correct: usize, total: usize) -> Uuid {
        let attempt = connection
            .create_attempt(Uuid::new_v4(), user_id, Utc::now())
            .await
            .unwrap();
        for index in 0..total {
            let answer = if index < correct {
                NewAnswer::answered(attempt.id, index, index as i64, 0, true, Utc::now())
            } else {
                NewAnswer::timed_out(attempt.id, index, index as i64)
            };
            connection.record_answer(&answer).await.unwrap();
        }
        connection
            .complete_attempt(attempt.id, total, Utc::now())
            .await
            .unwrap();
        attempt.id
    }

    async fn seed() -> Connection {
        let connection = Connection::in_memory().await;
        let mut ada = UserProfile::new(1, "Ada");
        ada.last_name = Some("Lovelace".to_owned());
        connection
            .upsert_user(&ada, Utc::now() - Duration::days(30))
            .await
            .unwrap();
        connection
            .upsert_user(&UserProfile::new(2, "Grace"), Utc::now())
            .await
            .unwrap();

        play(&connection, 1, 3, 4).await;
        play(&connection, 1, 1, 4).await;
        play(&connection, 2, 4, 4).await;
        // Abandoned attempt, never completed.
        connection
            .create_attempt(Uuid::new_v4(), 2, Utc::now())
            .await
            .unwrap();

        connection
    }

    #[tokio::test]
    async fn user_summary_counts_completed_attempts_only() {
        let connection = seed().await;

        let ada = connection.user_summary(1).await.unwrap().unwrap();
        assert_eq!(ada.total_attempts, 2);
        assert_eq!(ada.completed, 2);
        assert_eq!(
            ada.best,
            Some(BestScore {
                score: 3,
                total_questions: 4
            })
        );
        assert!((ada.accuracy - 50.0).abs() < f64::EPSILON);

        let grace = connection.user_summary(2).await.unwrap().unwrap();
        assert_eq!(grace.total_attempts, 2);
        assert_eq!(grace.completed, 1);

        assert!(connection.user_summary(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_details_aggregate_answers() {
        let connection = seed().await;

        let details = connection.user_details(1).await.unwrap().unwrap();
        assert_eq!(details.user.full_name(), "Ada Lovelace");
        assert!((details.average_score - 2.0).abs() < f64::EPSILON);
        assert_eq!(details.best_score, 3);
        assert_eq!(details.questions_answered, 8);
        assert_eq!(details.correct_answers, 4);
        assert!(details.last_activity.is_some());
    }

    #[tokio::test]
    async fn global_stats_cover_everyone() {
        let connection = seed().await;

        let stats = connection
            .global_stats(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.new_users, 1);
        assert_eq!(stats.total_quizzes, 4);
        assert_eq!(stats.completed_quizzes, 3);
        assert_eq!(stats.recent_quizzes, 4);
        assert_eq!(stats.total_answers, 12);
        assert_eq!(stats.correct_answers, 8);
        assert!((stats.average_score - 8.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn leaderboards_are_ordered() {
        let connection = seed().await;

        let active = connection.most_active_users(10).await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].user.user_id, 1);
        assert_eq!(active[0].quiz_count, 2);

        let top = connection.top_scores(10).await.unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].first_name, "Grace");
        assert_eq!(top[0].score, 4);

        let recent = connection.recent_users(1).await.unwrap();
        assert_eq!(recent.total, 2);
        assert_eq!(recent.users[0].first_name, "Grace");
    }

    #[test]
    fn percentage_of_nothing_is_zero() {
        assert_eq!(percentage(3, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }
}
