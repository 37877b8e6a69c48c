use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity fields reported by the messaging platform for the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub joined_date: DateTime<Utc>,
}

/// Durable record of one quiz session. `end_time` stays `None` while the
/// quiz runs, and forever if it was abandoned.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub score: i64,
    pub total_questions: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserAnswer {
    pub id: i64,
    pub quiz_attempt_id: Uuid,
    pub question_index: i64,
    pub question_id: i64,
    pub selected_option: Option<i64>,
    pub is_correct: Option<bool>,
    pub answer_time: Option<DateTime<Utc>>,
}

/// An answer, or the absence of one, about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnswer {
    pub quiz_attempt_id: Uuid,
    pub question_index: usize,
    pub question_id: i64,
    pub selected_option: Option<usize>,
    pub is_correct: bool,
    pub answer_time: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn new(user_id: i64, first_name: impl Into<String>) -> Self {
        Self {
            user_id,
            username: None,
            first_name: first_name.into(),
            last_name: None,
        }
    }
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last_name) if !last_name.is_empty() => format!("{} {}", self.first_name, last_name),
            _ => self.first_name.clone(),
        }
    }
}

impl NewAnswer {
    pub fn answered(
        quiz_attempt_id: Uuid,
        question_index: usize,
        question_id: i64,
        selected_option: usize,
        is_correct: bool,
        answer_time: DateTime<Utc>,
    ) -> Self {
        Self {
            quiz_attempt_id,
            question_index,
            question_id,
            selected_option: Some(selected_option),
            is_correct,
            answer_time: Some(answer_time),
        }
    }

    pub fn timed_out(quiz_attempt_id: Uuid, question_index: usize, question_id: i64) -> Self {
        Self {
            quiz_attempt_id,
            question_index,
            question_id,
            selected_option: None,
            is_correct: false,
            answer_time: None,
        }
    }
}
