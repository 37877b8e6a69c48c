use std::sync::Arc;

use chrono::{Duration, Utc};
use teloxide::{
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{Message, ParseMode, ReplyMarkup},
    Bot,
};
use tracing::{error, info, instrument, warn};

use crate::{
    database::{
        connection::{PurgeUsers, RegisterUser},
        stats::RetrieveStats,
        Connection,
    },
    engine::QuizEngine,
    error::QuizError,
    keyboard::{confirm_keyboard, CANCEL, CONFIRM},
    report,
    state::DialogueState,
    HandlerResult, UserDialogue,
};

const LIST_LIMIT: i64 = 10;
const RECENT_DAYS: i64 = 7;

pub(crate) fn parse_user_id(raw: &str) -> Result<i64, QuizError> {
    raw.trim().parse().map_err(|_| {
        QuizError::InvalidArgument(
            "Please provide a valid numeric user ID. Usage: /user_stats <user_id>".to_owned(),
        )
    })
}

pub(crate) fn parse_days(raw: &str) -> Result<u32, QuizError> {
    match raw.trim().parse::<u32>() {
        Ok(days) if days >= 1 => Ok(days),
        _ => Err(QuizError::InvalidArgument(
            "Please provide a number of days of at least 1. Usage: /cleanup <days>".to_owned(),
        )),
    }
}

async fn reply(bot: &Bot, msg: &Message, text: String) -> HandlerResult {
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn reply_error(bot: &Bot, msg: &Message, e: QuizError) -> HandlerResult {
    match &e {
        QuizError::InvalidArgument(_) | QuizError::NotFound(_) => {
            warn!(error = %e, "Rejected admin command")
        }
        _ => error!(error = %e, "Admin command failed"),
    }
    bot.send_message(msg.chat.id, e.user_message()).await?;
    Ok(())
}

pub(crate) async fn admin_help(bot: Bot, msg: Message) -> HandlerResult {
    reply(&bot, &msg, report::admin_help()).await
}

#[instrument(level = "info", skip(bot, connection))]
pub(crate) async fn users(bot: Bot, msg: Message, connection: Arc<Connection>) -> HandlerResult {
    match connection.recent_users(LIST_LIMIT).await {
        Ok(recent) => reply(&bot, &msg, report::recent_users(&recent)).await,
        Err(e) => reply_error(&bot, &msg, e).await,
    }
}

#[instrument(level = "info", skip(bot, connection))]
pub(crate) async fn user_stats(
    bot: Bot,
    msg: Message,
    connection: Arc<Connection>,
    raw_user_id: String,
) -> HandlerResult {
    let details = match parse_user_id(&raw_user_id) {
        Ok(user_id) => connection
            .user_details(user_id)
            .await
            .and_then(|details| {
                details.ok_or_else(|| QuizError::NotFound(format!("User with ID {user_id}")))
            }),
        Err(e) => Err(e),
    };

    match details {
        Ok(details) => reply(&bot, &msg, report::user_details(&details)).await,
        Err(e) => reply_error(&bot, &msg, e).await,
    }
}

#[instrument(level = "info", skip(bot, connection))]
pub(crate) async fn global_stats(
    bot: Bot,
    msg: Message,
    connection: Arc<Connection>,
) -> HandlerResult {
    let since = Utc::now() - Duration::days(RECENT_DAYS);
    match connection.global_stats(since).await {
        Ok(stats) => reply(&bot, &msg, report::global_stats(&stats)).await,
        Err(e) => reply_error(&bot, &msg, e).await,
    }
}

#[instrument(level = "info", skip(bot, connection))]
pub(crate) async fn active_users(
    bot: Bot,
    msg: Message,
    connection: Arc<Connection>,
) -> HandlerResult {
    match connection.most_active_users(LIST_LIMIT).await {
        Ok(users) => reply(&bot, &msg, report::active_users(&users)).await,
        Err(e) => reply_error(&bot, &msg, e).await,
    }
}

#[instrument(level = "info", skip(bot, connection))]
pub(crate) async fn top_scores(
    bot: Bot,
    msg: Message,
    connection: Arc<Connection>,
) -> HandlerResult {
    match connection.top_scores(LIST_LIMIT).await {
        Ok(scores) => reply(&bot, &msg, report::top_scores(&scores)).await,
        Err(e) => reply_error(&bot, &msg, e).await,
    }
}

#[instrument(level = "info", skip(bot, dialogue, connection))]
pub(crate) async fn cleanup(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    connection: Arc<Connection>,
    raw_days: String,
) -> HandlerResult {
    let days = match parse_days(&raw_days) {
        Ok(days) => days,
        Err(e) => return reply_error(&bot, &msg, e).await,
    };

    let cutoff = Utc::now() - Duration::days(i64::from(days));
    let count = match connection.count_inactive_users(cutoff).await {
        Ok(count) => count,
        Err(e) => return reply_error(&bot, &msg, e).await,
    };

    if count == 0 {
        return reply(&bot, &msg, format!("No users inactive for more than {days} days.")).await;
    }

    bot.send_message(msg.chat.id, report::cleanup_preview(count, days))
        .parse_mode(ParseMode::Html)
        .reply_markup(confirm_keyboard())
        .await?;
    dialogue.update(DialogueState::ConfirmCleanup { days }).await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, dialogue, connection))]
pub(crate) async fn delete_user(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    connection: Arc<Connection>,
    raw_user_id: String,
) -> HandlerResult {
    let user = match parse_user_id(&raw_user_id) {
        Ok(user_id) => connection
            .retrieve_user(user_id)
            .await
            .and_then(|user| {
                user.ok_or_else(|| QuizError::NotFound(format!("User with ID {user_id}")))
            }),
        Err(e) => Err(e),
    };
    let user = match user {
        Ok(user) => user,
        Err(e) => return reply_error(&bot, &msg, e).await,
    };

    bot.send_message(msg.chat.id, report::delete_user_preview(&user))
        .parse_mode(ParseMode::Html)
        .reply_markup(confirm_keyboard())
        .await?;
    dialogue
        .update(DialogueState::ConfirmDeleteUser {
            user_id: user.user_id,
        })
        .await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Confirmation {
    Confirmed,
    Cancelled,
    Unclear,
}

fn confirmation(reply: Option<&str>) -> Confirmation {
    match reply.map(str::trim) {
        Some(text) if text.eq_ignore_ascii_case(CONFIRM) => Confirmation::Confirmed,
        Some(text) if text.eq_ignore_ascii_case(CANCEL) => Confirmation::Cancelled,
        _ => Confirmation::Unclear,
    }
}

async fn finish(bot: &Bot, msg: &Message, dialogue: &UserDialogue, text: String) -> HandlerResult {
    bot.send_message(msg.chat.id, text)
        .reply_markup(ReplyMarkup::kb_remove())
        .await?;
    dialogue.update(DialogueState::Idle).await?;
    Ok(())
}

async fn reprompt(bot: &Bot, msg: &Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        format!("Please send {CONFIRM} to proceed or {CANCEL} to abort."),
    )
    .reply_markup(confirm_keyboard())
    .await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, dialogue, connection))]
pub(crate) async fn confirm_cleanup(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    connection: Arc<Connection>,
    days: u32,
) -> HandlerResult {
    match confirmation(msg.text()) {
        Confirmation::Confirmed => {
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            let text = match connection.purge_inactive_users(cutoff).await {
                Ok(deleted) => {
                    info!(deleted, days, "Inactive users purged");
                    format!("Deleted {deleted} inactive users.")
                }
                Err(e) => {
                    error!(error = %e, "Failed to purge inactive users");
                    e.user_message()
                }
            };
            finish(&bot, &msg, &dialogue, text).await
        }
        Confirmation::Cancelled => finish(&bot, &msg, &dialogue, "Cleanup cancelled.".to_owned()).await,
        Confirmation::Unclear => reprompt(&bot, &msg).await,
    }
}

#[instrument(level = "info", skip(bot, dialogue, engine))]
pub(crate) async fn confirm_delete_user(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    engine: Arc<QuizEngine>,
    user_id: i64,
) -> HandlerResult {
    match confirmation(msg.text()) {
        Confirmation::Confirmed => {
            let text = match engine.delete_user(user_id).await {
                Ok(0) => format!("User with ID {user_id} not found."),
                Ok(_) => {
                    info!(user_id, "User deleted");
                    format!("User {user_id} and all of their quiz data were deleted.")
                }
                Err(e) => {
                    error!(error = %e, "Failed to delete user");
                    e.user_message()
                }
            };
            finish(&bot, &msg, &dialogue, text).await
        }
        Confirmation::Cancelled => finish(&bot, &msg, &dialogue, "Deletion cancelled.".to_owned()).await,
        Confirmation::Unclear => reprompt(&bot, &msg).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_replies_ignore_case_and_padding() {
        assert_eq!(confirmation(Some("CONFIRM")), Confirmation::Confirmed);
        assert_eq!(confirmation(Some(" confirm ")), Confirmation::Confirmed);
        assert_eq!(confirmation(Some("Cancel")), Confirmation::Cancelled);
        assert_eq!(confirmation(Some("\tCANCEL\n")), Confirmation::Cancelled);

        for unclear in [Some("yes"), Some("confirmed"), Some(""), None] {
            assert_eq!(confirmation(unclear), Confirmation::Unclear, "{unclear:?}");
        }
    }

    #[test]
    fn user_ids_must_be_numeric() {
        assert_eq!(parse_user_id(" 652429947 ").unwrap(), 652429947);
        assert!(matches!(
            parse_user_id(""),
            Err(QuizError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_user_id("@someone"),
            Err(QuizError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cleanup_needs_at_least_one_day() {
        assert_eq!(parse_days("30").unwrap(), 30);
        for raw in ["0", "-3", "", "week"] {
            assert!(
                matches!(parse_days(raw), Err(QuizError::InvalidArgument(_))),
                "{raw} accepted"
            );
        }
    }
}
