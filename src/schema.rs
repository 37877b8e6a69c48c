use std::{error::Error, sync::Arc};

use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        DpHandlerDescription, UpdateFilterExt, UpdateHandler,
    },
    dptree::{self, Handler},
    prelude::{DependencyMap, Requester},
    types::{Message, Update},
    Bot,
};
use tracing::{info, instrument};

use crate::{
    admin,
    commands::{self, AdminCommand, Command},
    config::Config,
    runner,
    state::DialogueState,
    HandlerResult,
};

type Branch = Handler<'static, DependencyMap, Result<(), Box<dyn Error + Send + Sync + 'static>>, DpHandlerDescription>;

pub fn schema() -> UpdateHandler<Box<dyn Error + Send + Sync + 'static>> {
    let message_handler = Update::filter_message()
        .branch(command_scheme())
        .branch(admin_scheme())
        .endpoint(invalid_state);

    dialogue::enter::<Update, InMemStorage<DialogueState>, DialogueState, _>()
        .branch(message_handler)
        .branch(Update::filter_callback_query().endpoint(runner::callback))
}

fn command_scheme() -> Branch {
    use dptree::case;

    teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(commands::start))
        .branch(case![Command::Quiz].endpoint(runner::quiz))
        .branch(case![Command::Stats].endpoint(commands::stats))
        .branch(case![Command::Help].endpoint(commands::help))
}

fn is_admin(msg: Message, config: Arc<Config>) -> bool {
    msg.from
        .as_ref()
        .is_some_and(|user| config.is_admin(user.id.0 as i64))
}

#[instrument(level = "debug")]
fn admin_scheme() -> Branch {
    use dptree::case;

    let admin_commands = teloxide::filter_command::<AdminCommand, _>()
        .branch(case![AdminCommand::Admin].endpoint(admin::admin_help))
        .branch(case![AdminCommand::Users].endpoint(admin::users))
        .branch(case![AdminCommand::UserStats(raw_user_id)].endpoint(admin::user_stats))
        .branch(case![AdminCommand::GlobalStats].endpoint(admin::global_stats))
        .branch(case![AdminCommand::ActiveUsers].endpoint(admin::active_users))
        .branch(case![AdminCommand::TopScores].endpoint(admin::top_scores))
        .branch(case![AdminCommand::Cleanup(raw_days)].endpoint(admin::cleanup))
        .branch(case![AdminCommand::DeleteUser(raw_user_id)].endpoint(admin::delete_user));

    dptree::filter(is_admin)
        .branch(admin_commands)
        .branch(case![DialogueState::ConfirmCleanup { days }].endpoint(admin::confirm_cleanup))
        .branch(
            case![DialogueState::ConfirmDeleteUser { user_id }]
                .endpoint(admin::confirm_delete_user),
        )
}

#[instrument(level = "info", skip(bot))]
async fn invalid_state(bot: Bot, msg: Message) -> HandlerResult {
    info!(text = ?msg.text(), "Unhandled message");
    bot.send_message(
        msg.chat.id,
        "Unable to handle the message. Enter /help to see usages.",
    )
    .await?;
    Ok(())
}
