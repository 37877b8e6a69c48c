//! Message texts. Everything here renders HTML for `ParseMode::Html`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use teloxide::utils::html::{bold, escape};

use crate::{
    database::{
        models::{QuizAttempt, User},
        stats::{percentage, ActiveUser, GlobalStats, RecentUsers, TopScore, UserDetails, UserSummary},
    },
    error::QuizError,
    presenter::QuestionView,
};

pub(crate) const NO_ACTIVE_QUIZ: &str = "No active quiz found. Please start a new one with /quiz";
pub(crate) const NO_QUIZZES_YET: &str = "You haven't taken any quizzes yet. Use /quiz to start one.";

pub(crate) fn welcome(first_name: &str) -> String {
    format!(
        "Welcome to the Passive Voice Grammar Quiz, {}!\n\n\
         This bot will test your knowledge of passive voice in English grammar.\n\n\
         Commands:\n\
         /start - Show this message\n\
         /quiz - Start a new quiz\n\
         /stats - View your statistics",
        escape(first_name)
    )
}

pub(crate) fn quiz_intro(first_name: &str, question_count: usize, time_limit: Duration) -> String {
    format!(
        "Welcome to the Passive Voice Grammar Quiz, {}!\n\n\
         You will be presented with {question_count} questions about passive voice in English grammar.\n\
         Each question has a {}-second time limit.\n\n\
         Click the button below when you're ready to start!",
        escape(first_name),
        time_limit.as_secs()
    )
}

pub(crate) fn countdown(remaining_secs: u32) -> String {
    format!("Quiz starting in {remaining_secs}...")
}

pub(crate) fn question(view: &QuestionView<'_>) -> String {
    format!(
        "Question {}/{}:\n\n{}",
        view.index + 1,
        view.total,
        escape(view.question.text())
    )
}

/// The question text followed by the time left, rounded up to whole seconds.
pub(crate) fn question_with_time_left(question_text: &str, remaining: Duration) -> String {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    format!("{question_text}\n\n⏱ {secs}s left")
}

pub(crate) fn completed(attempt: &QuizAttempt) -> String {
    format!(
        "Quiz completed!\n\n\
         Your score: {}/{}\n\n\
         Thank you for taking the Passive Voice Grammar Quiz!",
        attempt.score, attempt.total_questions
    )
}

pub(crate) fn expired() -> String {
    "This quiz was not started in time. Use /quiz to try again.".to_owned()
}

/// The quiz was dropped because its progress could not be saved.
pub(crate) fn failure(error: &QuizError) -> String {
    format!("{}\nUse /quiz to start over.", escape(&error.user_message()))
}

pub(crate) fn cancelled() -> String {
    "This quiz was cancelled.".to_owned()
}

pub(crate) fn answer_feedback(is_correct: bool) -> &'static str {
    if is_correct {
        "✅ Correct!"
    } else {
        "❌ Incorrect!"
    }
}

pub(crate) fn user_summary(summary: &UserSummary) -> String {
    let (best_score, best_total) = summary
        .best
        .as_ref()
        .map_or((0, 0), |best| (best.score, best.total_questions));

    format!(
        "📊 {}\n\n\
         Total quiz attempts: {}\n\
         Completed quizzes: {}\n\
         Best score: {best_score}/{best_total}\n\
         Overall accuracy: {:.1}%\n\n\
         Keep practicing to improve your passive voice grammar skills!",
        bold("Your Statistics"),
        summary.total_attempts,
        summary.completed,
        summary.accuracy
    )
}

pub(crate) fn admin_help() -> String {
    format!(
        "🔐 {}\n\n\
         /admin - Show this help message\n\
         /users - Show total user count and recent users\n\
         /user_stats &lt;user_id&gt; - Show detailed stats for a specific user\n\
         /global_stats - Show global statistics for the bot\n\
         /active_users - Show most active users by quiz count\n\
         /top_scores - Show users with highest scores\n\
         /cleanup &lt;days&gt; - Remove users inactive for the given number of days\n\
         /delete_user &lt;user_id&gt; - Remove a user and all their quiz data",
        bold("Admin Commands")
    )
}

fn full_name(first_name: &str, last_name: Option<&str>) -> String {
    match last_name {
        Some(last_name) if !last_name.is_empty() => {
            escape(&format!("{first_name} {last_name}"))
        }
        _ => escape(first_name),
    }
}

fn handle(user: &User) -> String {
    match &user.username {
        Some(username) => format!("@{}", escape(username)),
        None => "No username".to_owned(),
    }
}

fn date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

fn date_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

pub(crate) fn recent_users(recent: &RecentUsers) -> String {
    let list = recent
        .users
        .iter()
        .enumerate()
        .map(|(i, user)| {
            format!(
                "{}. {} ({}) - ID: {} - Joined: {}",
                i + 1,
                full_name(&user.first_name, user.last_name.as_deref()),
                handle(user),
                user.user_id,
                date(user.joined_date)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "👥 {}\n\nTotal registered users: {}\n\n{}\n{list}",
        bold("User Statistics"),
        recent.total,
        bold("Most recent users:")
    )
}

pub(crate) fn user_details(details: &UserDetails) -> String {
    let user = &details.user;
    let last_activity = details
        .last_activity
        .map_or_else(|| "Never".to_owned(), date_time);

    format!(
        "📊 {}\n\n\
         User: {}\n\
         Username: {}\n\
         User ID: {}\n\
         Joined: {}\n\n\
         {}\n\
         Total quiz attempts: {}\n\
         Completed quizzes: {}\n\
         Average score: {:.1}\n\
         Best score: {}\n\
         Questions answered: {}\n\
         Correct answers: {}\n\
         Accuracy: {:.1}%\n\n\
         Last activity: {last_activity}",
        bold("User Details"),
        full_name(&user.first_name, user.last_name.as_deref()),
        handle(user),
        user.user_id,
        date_time(user.joined_date),
        bold("Quiz Statistics:"),
        details.total_attempts,
        details.completed,
        details.average_score,
        details.best_score,
        details.questions_answered,
        details.correct_answers,
        details.accuracy
    )
}

pub(crate) fn global_stats(stats: &GlobalStats) -> String {
    format!(
        "📈 {}\n\n\
         {}\n\
         Total users: {}\n\
         New users (last 7 days): {}\n\n\
         {}\n\
         Total quizzes started: {}\n\
         Completed quizzes: {}\n\
         Quizzes taken (last 7 days): {}\n\
         Average score: {:.1}\n\n\
         {}\n\
         Total questions answered: {}\n\
         Correct answers: {}\n\
         Global accuracy: {:.1}%",
        bold("Global Statistics"),
        bold("User Stats:"),
        stats.total_users,
        stats.new_users,
        bold("Quiz Stats:"),
        stats.total_quizzes,
        stats.completed_quizzes,
        stats.recent_quizzes,
        stats.average_score,
        bold("Question Stats:"),
        stats.total_answers,
        stats.correct_answers,
        stats.accuracy
    )
}

pub(crate) fn active_users(users: &[ActiveUser]) -> String {
    if users.is_empty() {
        return "No quiz activity yet.".to_owned();
    }

    let list = users
        .iter()
        .enumerate()
        .map(|(i, active)| {
            format!(
                "{}. {} ({}) - {} quizzes",
                i + 1,
                full_name(&active.user.first_name, active.user.last_name.as_deref()),
                handle(&active.user),
                active.quiz_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("🏆 {}\n\n{list}", bold("Most Active Users"))
}

pub(crate) fn top_scores(scores: &[TopScore]) -> String {
    if scores.is_empty() {
        return "No completed quizzes yet.".to_owned();
    }

    let list = scores
        .iter()
        .enumerate()
        .map(|(i, top)| {
            format!(
                "{}. {} - Score: {}/{} ({:.1}%)",
                i + 1,
                full_name(&top.first_name, top.last_name.as_deref()),
                top.score,
                top.total_questions,
                percentage(top.score, top.total_questions)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("🥇 {}\n\n{list}", bold("Top Quiz Scores"))
}

pub(crate) fn cleanup_preview(count: i64, days: u32) -> String {
    format!(
        "{count} users have been inactive for more than {days} days.\n\
         Send {} to delete them or {} to abort.",
        bold("CONFIRM"),
        bold("CANCEL")
    )
}

pub(crate) fn delete_user_preview(user: &User) -> String {
    format!(
        "Delete {} ({}, ID: {}) and all of their quiz data?\n\
         Send {} to delete or {} to abort.",
        full_name(&user.first_name, user.last_name.as_deref()),
        handle(user),
        user.user_id,
        bold("CONFIRM"),
        bold("CANCEL")
    )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::{database::stats::BestScore, questions::Question};

    fn user() -> User {
        User {
            id: 1,
            user_id: 42,
            username: None,
            first_name: "Ada".to_owned(),
            last_name: Some("<Lovelace>".to_owned()),
            joined_date: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn question_is_numbered_from_one() {
        let question = Question::new(
            5,
            "The letter ___ yesterday.",
            vec!["was sent".to_owned(), "sent".to_owned()],
            0,
        );
        let view = QuestionView {
            index: 2,
            total: 10,
            question: &question,
            time_limit: Duration::from_secs(30),
        };

        assert_eq!(
            super::question(&view),
            "Question 3/10:\n\nThe letter ___ yesterday."
        );
    }

    #[test]
    fn time_left_rounds_up() {
        assert!(question_with_time_left("Q", Duration::from_millis(4_200)).ends_with("5s left"));
        assert!(question_with_time_left("Q", Duration::from_secs(5)).ends_with("5s left"));
    }

    #[test]
    fn completion_shows_score() {
        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            user_id: 1,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            score: 7,
            total_questions: 10,
        };

        assert!(completed(&attempt).contains("Your score: 7/10"));
    }

    #[test]
    fn failure_hides_storage_details() {
        let error = QuizError::Database(sqlx::Error::PoolClosed);
        let text = failure(&error);

        assert!(text.starts_with("Something went wrong. Please try again later."));
        assert!(text.ends_with("/quiz to start over."));
        assert!(!text.to_lowercase().contains("pool"));
    }

    #[test]
    fn names_are_escaped() {
        let text = recent_users(&RecentUsers {
            total: 1,
            users: vec![user()],
        });

        assert!(text.contains("Ada &lt;Lovelace&gt; (No username) - ID: 42 - Joined: 2025-03-01"));
        assert!(text.contains("Total registered users: 1"));
    }

    #[test]
    fn summary_without_completed_attempts_shows_zero_best() {
        let mut summary = UserSummary {
            user: user(),
            total_attempts: 2,
            completed: 0,
            best: None,
            accuracy: 0.0,
        };
        assert!(user_summary(&summary).contains("Best score: 0/0"));

        summary.best = Some(BestScore {
            score: 8,
            total_questions: 10,
        });
        summary.accuracy = 80.0;
        let text = user_summary(&summary);
        assert!(text.contains("Best score: 8/10"));
        assert!(text.contains("Overall accuracy: 80.0%"));
    }

    #[test]
    fn top_scores_include_percentage() {
        let text = top_scores(&[TopScore {
            first_name: "Ada".to_owned(),
            last_name: None,
            score: 3,
            total_questions: 4,
        }]);

        assert!(text.contains("1. Ada - Score: 3/4 (75.0%)"));
        assert_eq!(top_scores(&[]), "No completed quizzes yet.");
    }
}
