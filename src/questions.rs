use std::{collections::HashSet, fmt, fs, path::Path};

use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::error::QuizError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Question {
    id: i64,
    question: String,
    options: Vec<String>,
    correct_answer: usize,
}

#[derive(Deserialize)]
struct QuestionFile {
    questions: Vec<Question>,
}

/// The immutable, ordered set of questions every quiz draws from.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl Question {
    pub fn new(
        id: i64,
        question: impl Into<String>,
        options: Vec<String>,
        correct_answer: usize,
    ) -> Self {
        Self {
            id,
            question: question.into(),
            options,
            correct_answer,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.question
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn correct_option(&self) -> usize {
        self.correct_answer
    }

    pub fn is_correct(&self, selected_option: usize) -> bool {
        selected_option == self.correct_answer
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.question)
    }
}

impl QuestionBank {
    /// Reads the question resource from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, QuizError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, QuizError> {
        let file: QuestionFile = serde_json::from_str(raw)?;
        Self::new(file.questions)
    }

    pub fn new(questions: Vec<Question>) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::InvalidQuestionBank(
                "no questions provided".to_owned(),
            ));
        }

        let mut seen = HashSet::new();
        for question in &questions {
            if !seen.insert(question.id) {
                return Err(QuizError::InvalidQuestionBank(format!(
                    "duplicate question id {}",
                    question.id
                )));
            }
            if question.options.len() < 2 {
                return Err(QuizError::InvalidQuestionBank(format!(
                    "question {} needs at least two options",
                    question.id
                )));
            }
            if question.correct_answer >= question.options.len() {
                return Err(QuizError::InvalidQuestionBank(format!(
                    "question {} marks option {} as correct but has {} options",
                    question.id,
                    question.correct_answer,
                    question.options.len()
                )));
            }
        }

        Ok(Self { questions })
    }

    pub fn all_questions(&self) -> &[Question] {
        &self.questions
    }

    /// A fresh per-session ordering of every question.
    pub fn shuffled(&self) -> Vec<Question> {
        let mut questions = self.questions.clone();
        questions.shuffle(&mut rand::thread_rng());
        questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANK: &str = r#"{
        "questions": [
            {"id": 1, "question": "The cake ___ by my mother.", "options": ["was baked", "baked"], "correct_answer": 0},
            {"id": 2, "question": "The road ___ now.", "options": ["repairs", "is being repaired", "repaired"], "correct_answer": 1},
            {"id": 3, "question": "Rice ___ in Asia.", "options": ["grows", "is grown"], "correct_answer": 1}
        ]
    }"#;

    #[test]
    fn loads_questions_in_file_order() {
        let bank = QuestionBank::from_json(BANK).unwrap();

        let ids: Vec<i64> = bank.all_questions().iter().map(Question::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(bank.all_questions()[1].text(), "The road ___ now.");
        assert!(bank.all_questions()[1].is_correct(1));
        assert!(!bank.all_questions()[1].is_correct(0));
    }

    #[test]
    fn shuffled_is_a_permutation_and_leaves_the_bank_untouched() {
        let bank = QuestionBank::from_json(BANK).unwrap();

        let mut ids: Vec<i64> = bank.shuffled().iter().map(Question::id).collect();
        ids.sort_unstable();

        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(bank.all_questions()[0].id(), 1);
    }

    #[test]
    fn rejects_out_of_range_correct_answer() {
        let err = QuestionBank::new(vec![Question::new(
            7,
            "Broken",
            vec!["a".to_owned(), "b".to_owned()],
            2,
        )])
        .unwrap_err();

        assert!(matches!(err, QuizError::InvalidQuestionBank(_)));
    }

    #[test]
    fn rejects_single_option_and_duplicates() {
        let single = QuestionBank::new(vec![Question::new(1, "Only", vec!["a".to_owned()], 0)]);
        assert!(matches!(single, Err(QuizError::InvalidQuestionBank(_))));

        let options = vec!["a".to_owned(), "b".to_owned()];
        let duplicated = QuestionBank::new(vec![
            Question::new(1, "First", options.clone(), 0),
            Question::new(1, "Second", options, 1),
        ]);
        assert!(matches!(duplicated, Err(QuizError::InvalidQuestionBank(_))));
    }

    #[test]
    fn rejects_empty_bank_and_malformed_json() {
        assert!(matches!(
            QuestionBank::from_json(r#"{"questions": []}"#),
            Err(QuizError::InvalidQuestionBank(_))
        ));
        assert!(matches!(
            QuestionBank::from_json("not json"),
            Err(QuizError::Json(_))
        ));
    }

    #[test]
    fn bundled_question_file_is_valid() {
        let bank = QuestionBank::load(concat!(env!("CARGO_MANIFEST_DIR"), "/questions.json")).unwrap();
        assert!(bank.len() >= 3);
    }
}
