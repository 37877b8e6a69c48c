use std::sync::Arc;

use teloxide::{
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{Message, ParseMode},
    utils::command::BotCommands,
    Bot,
};
use tracing::{info, instrument};

use crate::{
    database::{stats::RetrieveStats, Connection},
    engine::QuizEngine,
    report, HandlerResult,
};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "register and show the welcome message.")]
    Start,
    #[command(description = "start a new quiz.")]
    Quiz,
    #[command(description = "view your statistics.")]
    Stats,
    #[command(description = "display this text.")]
    Help,
}

/// Commands for allow-listed administrators.
#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "snake_case")]
pub enum AdminCommand {
    #[command(description = "show admin commands.")]
    Admin,
    #[command(description = "total user count and recent users.")]
    Users,
    #[command(description = "detailed stats for a user.")]
    UserStats(String),
    #[command(description = "global statistics.")]
    GlobalStats,
    #[command(description = "most active users.")]
    ActiveUsers,
    #[command(description = "highest scores.")]
    TopScores,
    #[command(description = "remove users inactive for the given number of days.")]
    Cleanup(String),
    #[command(description = "remove a user and their quiz data.")]
    DeleteUser(String),
}

#[instrument(level = "info", skip(bot, engine))]
pub(crate) async fn start(bot: Bot, msg: Message, engine: Arc<QuizEngine>) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    if let Err(e) = engine.register_user(&from.into()).await {
        tracing::error!(error = %e, "Failed to register user");
        bot.send_message(msg.chat.id, e.user_message()).await?;
        return Ok(());
    }
    info!(user_id = from.id.0, "User registered");

    bot.send_message(msg.chat.id, report::welcome(&from.first_name))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub(crate) async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, connection))]
pub(crate) async fn stats(bot: Bot, msg: Message, connection: Arc<Connection>) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let text = match connection.user_summary(from.id.0 as i64).await {
        Ok(Some(summary)) if summary.total_attempts > 0 => report::user_summary(&summary),
        Ok(_) => report::NO_QUIZZES_YET.to_owned(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load user statistics");
            e.user_message()
        }
    };

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}
