use std::{fmt, str::FromStr};

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

pub(crate) const START_QUIZ: &str = "start_quiz";
pub(crate) const CONFIRM: &str = "CONFIRM";
pub(crate) const CANCEL: &str = "CANCEL";

/// What a button click asks for, decoded from its callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    StartQuiz,
    Answer {
        question_index: usize,
        selected_option: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCallback(pub String);

impl fmt::Display for UnknownCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown callback payload '{}'", self.0)
    }
}

impl std::error::Error for UnknownCallback {}

impl FromStr for CallbackAction {
    type Err = UnknownCallback;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        if data == START_QUIZ {
            return Ok(CallbackAction::StartQuiz);
        }

        let unknown = || UnknownCallback(data.to_owned());
        let (question_index, selected_option) = data
            .strip_prefix("answer_")
            .and_then(|rest| rest.split_once('_'))
            .ok_or_else(unknown)?;

        Ok(CallbackAction::Answer {
            question_index: question_index.parse().map_err(|_| unknown())?,
            selected_option: selected_option.parse().map_err(|_| unknown())?,
        })
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackAction::StartQuiz => f.write_str(START_QUIZ),
            CallbackAction::Answer {
                question_index,
                selected_option,
            } => write!(f, "answer_{question_index}_{selected_option}"),
        }
    }
}

/// `A`, `B`, ... `Z`, then `AA`, `AB`, ...
pub(crate) fn option_label(mut index: usize) -> String {
    let mut label = Vec::new();
    loop {
        label.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    label.reverse();
    String::from_utf8_lossy(&label).into_owned()
}

pub(crate) fn start_quiz_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Start Quiz",
        CallbackAction::StartQuiz.to_string(),
    )]])
}

pub(crate) fn options_keyboard(question_index: usize, options: &[String]) -> InlineKeyboardMarkup {
    let keyboard: Vec<Vec<InlineKeyboardButton>> = options
        .iter()
        .enumerate()
        .map(|(selected_option, option)| {
            let action = CallbackAction::Answer {
                question_index,
                selected_option,
            };
            vec![InlineKeyboardButton::callback(
                format!("{}. {}", option_label(selected_option), option),
                action.to_string(),
            )]
        })
        .collect();

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn confirm_keyboard() -> KeyboardMarkup {
    let keyboard: Vec<Vec<KeyboardButton>> =
        vec![vec![KeyboardButton::new(CONFIRM), KeyboardButton::new(CANCEL)]];

    KeyboardMarkup::new(keyboard)
}
