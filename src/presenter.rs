use std::{
    collections::HashMap,
    error::Error,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use teloxide::{
    payloads::EditMessageTextSetters,
    prelude::Requester,
    types::{ChatId, InlineKeyboardMarkup, MessageId, ParseMode},
    Bot,
};

use crate::{
    database::models::QuizAttempt, error::QuizError, keyboard::options_keyboard,
    questions::Question, report,
};

pub type PresentResult = Result<(), Box<dyn Error + Send + Sync + 'static>>;

#[derive(Debug, Clone, Copy)]
pub struct QuestionView<'a> {
    pub index: usize,
    pub total: usize,
    pub question: &'a Question,
    pub time_limit: Duration,
}

/// Outbound side of the quiz: how the state machine shows things to a user.
///
/// Failures are reported back only so they can be logged. The state machine
/// never changes course because a message could not be delivered.
#[async_trait]
pub trait QuizPresenter: Send + Sync {
    /// One step of the cosmetic countdown before the first question.
    async fn countdown(&self, user_id: i64, remaining_secs: u32) -> PresentResult;

    async fn question(&self, user_id: i64, view: QuestionView<'_>) -> PresentResult;

    /// Optional reminder of the time left on the current question.
    async fn tick(&self, user_id: i64, question_index: usize, remaining: Duration) -> PresentResult;

    async fn completed(&self, user_id: i64, attempt: &QuizAttempt) -> PresentResult;

    /// The quiz was never started and has been dropped.
    async fn expired(&self, user_id: i64) -> PresentResult;

    /// The quiz was dropped because `error` left it unable to continue.
    async fn failed(&self, user_id: i64, error: &QuizError) -> PresentResult;

    /// The quiz was ended from outside, e.g. by deleting the user.
    async fn cancelled(&self, user_id: i64) -> PresentResult;
}

#[derive(Debug, Clone)]
pub struct QuizMessage {
    chat_id: ChatId,
    message_id: MessageId,
    question: Option<ShownQuestion>,
}

#[derive(Debug, Clone)]
struct ShownQuestion {
    index: usize,
    text: String,
    markup: InlineKeyboardMarkup,
}

/// Renders a quiz by editing a single message per user: the one that
/// carried the "Start Quiz" button.
pub struct TelegramPresenter {
    bot: Bot,
    messages: Mutex<HashMap<i64, QuizMessage>>,
}

impl TelegramPresenter {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            messages: Mutex::new(HashMap::new()),
        }
    }

    fn messages(&self) -> MutexGuard<'_, HashMap<i64, QuizMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `message_id` the message the user's quiz is rendered into.
    pub fn attach(&self, user_id: i64, chat_id: ChatId, message_id: MessageId) {
        self.messages().insert(
            user_id,
            QuizMessage {
                chat_id,
                message_id,
                question: None,
            },
        );
    }

    /// Forgets the user's quiz message. Returns it if there was one.
    pub fn detach(&self, user_id: i64) -> Option<QuizMessage> {
        self.messages().remove(&user_id)
    }

    /// Whether `message_id` in `chat_id` is the message the user's quiz is
    /// currently rendered into.
    pub fn is_current(&self, user_id: i64, chat_id: ChatId, message_id: MessageId) -> bool {
        self.messages()
            .get(&user_id)
            .is_some_and(|message| message.chat_id == chat_id && message.message_id == message_id)
    }

    fn message(&self, user_id: i64) -> Result<QuizMessage, Box<dyn Error + Send + Sync + 'static>> {
        self.messages()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| format!("no quiz message for user {user_id}").into())
    }

    async fn edit(
        &self,
        message: &QuizMessage,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    ) -> PresentResult {
        let mut request = self
            .bot
            .edit_message_text(message.chat_id, message.message_id, text)
            .parse_mode(ParseMode::Html);
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        request.await?;
        Ok(())
    }

    /// Shows the final `text` and lets go of the message.
    async fn close(&self, user_id: i64, text: String) -> PresentResult {
        let message = self
            .detach(user_id)
            .ok_or_else(|| format!("no quiz message for user {user_id}"))?;
        self.edit(&message, text, None).await
    }
}

#[async_trait]
impl QuizPresenter for TelegramPresenter {
    async fn countdown(&self, user_id: i64, remaining_secs: u32) -> PresentResult {
        let message = self.message(user_id)?;
        self.edit(&message, report::countdown(remaining_secs), None).await
    }

    async fn question(&self, user_id: i64, view: QuestionView<'_>) -> PresentResult {
        let shown = ShownQuestion {
            index: view.index,
            text: report::question(&view),
            markup: options_keyboard(view.index, view.question.options()),
        };

        let message = {
            let mut messages = self.messages();
            let message = messages
                .get_mut(&user_id)
                .ok_or_else(|| format!("no quiz message for user {user_id}"))?;
            message.question = Some(shown.clone());
            message.clone()
        };

        self.edit(&message, shown.text, Some(shown.markup)).await
    }

    async fn tick(&self, user_id: i64, question_index: usize, remaining: Duration) -> PresentResult {
        let message = self.message(user_id)?;
        let Some(shown) = message
            .question
            .as_ref()
            .filter(|shown| shown.index == question_index)
        else {
            return Ok(());
        };

        let text = report::question_with_time_left(&shown.text, remaining);
        self.edit(&message, text, Some(shown.markup.clone())).await
    }

    async fn completed(&self, user_id: i64, attempt: &QuizAttempt) -> PresentResult {
        self.close(user_id, report::completed(attempt)).await
    }

    async fn expired(&self, user_id: i64) -> PresentResult {
        self.close(user_id, report::expired()).await
    }

    async fn failed(&self, user_id: i64, error: &QuizError) -> PresentResult {
        self.close(user_id, report::failure(error)).await
    }

    async fn cancelled(&self, user_id: i64) -> PresentResult {
        self.close(user_id, report::cancelled()).await
    }
}
