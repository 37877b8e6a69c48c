use std::sync::Arc;

use teloxide::{
    payloads::{AnswerCallbackQuerySetters, SendMessageSetters},
    prelude::Requester,
    types::{CallbackQuery, ChatId, Message, MessageId, ParseMode, User},
    Bot,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    database::models::UserProfile,
    engine::QuizEngine,
    error::QuizError,
    keyboard::{start_quiz_keyboard, CallbackAction},
    presenter::TelegramPresenter,
    report, HandlerResult,
};

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

#[instrument(level = "info", skip(bot, engine, presenter))]
pub(crate) async fn quiz(
    bot: Bot,
    msg: Message,
    engine: Arc<QuizEngine>,
    presenter: Arc<TelegramPresenter>,
) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let profile = UserProfile::from(from);

    let started = match engine.try_start(&profile).await {
        Ok(started) => started,
        Err(e) => {
            match &e {
                QuizError::AlreadyActive => info!(user_id = profile.user_id, "Quiz already running"),
                _ => error!(user_id = profile.user_id, error = %e, "Failed to start quiz"),
            }
            bot.send_message(msg.chat.id, e.user_message()).await?;
            return Ok(());
        }
    };

    let intro = bot
        .send_message(
            msg.chat.id,
            report::quiz_intro(&from.first_name, started.question_count, started.time_limit),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(start_quiz_keyboard())
        .await;

    match intro {
        Ok(intro) => {
            presenter.attach(profile.user_id, intro.chat.id, intro.id);
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Failed to send quiz introduction");
            engine
                .expire_unstarted(profile.user_id, started.attempt_id)
                .await;
            Err(e.into())
        }
    }
}

async fn acknowledge(bot: &Bot, q: &CallbackQuery, text: Option<&str>) {
    let mut answer = bot.answer_callback_query(&q.id);
    if let Some(text) = text {
        answer = answer.text(text);
    }
    if let Err(e) = answer.await {
        warn!(error = %e, "Failed to acknowledge callback query");
    }
}

/// The message the clicked button belongs to.
fn clicked_message(q: &CallbackQuery) -> Option<(ChatId, MessageId)> {
    q.message
        .as_ref()
        .map(|message| (message.chat().id, message.id()))
}

fn is_current_click(
    presenter: &TelegramPresenter,
    user_id: i64,
    clicked: Option<(ChatId, MessageId)>,
) -> bool {
    clicked.is_some_and(|(chat_id, message_id)| presenter.is_current(user_id, chat_id, message_id))
}

#[instrument(
    level = "info",
    skip(bot, q, engine, presenter),
    fields(user_id = q.from.id.0, data = ?q.data)
)]
pub(crate) async fn callback(
    bot: Bot,
    q: CallbackQuery,
    engine: Arc<QuizEngine>,
    presenter: Arc<TelegramPresenter>,
) -> HandlerResult {
    let user_id = q.from.id.0 as i64;

    let action = match q.data.as_deref().map(str::parse::<CallbackAction>) {
        Some(Ok(action)) => action,
        Some(Err(e)) => {
            warn!(error = %e, "Ignoring callback");
            acknowledge(&bot, &q, None).await;
            return Ok(());
        }
        None => {
            acknowledge(&bot, &q, None).await;
            return Ok(());
        }
    };

    if engine.registry().get(user_id).is_none() {
        acknowledge(&bot, &q, Some(report::NO_ACTIVE_QUIZ)).await;
        return Ok(());
    }
    if !is_current_click(&presenter, user_id, clicked_message(&q)) {
        debug!("Button clicked on a message of an earlier quiz");
        acknowledge(&bot, &q, Some(&QuizError::StaleSubmission.user_message())).await;
        return Ok(());
    }

    match action {
        CallbackAction::StartQuiz => {
            acknowledge(&bot, &q, Some("Starting quiz...")).await;

            match engine.begin(user_id).await {
                Ok(()) => {}
                Err(QuizError::StaleSubmission | QuizError::NotFound(_)) => {
                    debug!("Start button clicked for a quiz that is already running or gone")
                }
                Err(e) => error!(error = %e, "Failed to begin quiz"),
            }
        }
        CallbackAction::Answer {
            question_index,
            selected_option,
        } => {
            let text = match engine
                .submit_answer(user_id, question_index, selected_option)
                .await
            {
                Ok(receipt) => report::answer_feedback(receipt.is_correct).to_owned(),
                Err(QuizError::NotFound(_)) => report::NO_ACTIVE_QUIZ.to_owned(),
                Err(e @ (QuizError::StaleSubmission | QuizError::InvalidArgument(_))) => {
                    debug!(error = %e, "Answer rejected");
                    e.user_message()
                }
                Err(e) => {
                    error!(error = %e, "Failed to record answer");
                    e.user_message()
                }
            };
            acknowledge(&bot, &q, Some(&text)).await;
        }
    }

    Ok(())
}
