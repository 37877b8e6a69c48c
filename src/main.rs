use std::{error::Error, sync::Arc};

use grammar_quiz_bot::{
    config::Config, database::Connection, engine::QuizEngine, presenter::TelegramPresenter,
    questions::QuestionBank, schema::schema, state::DialogueState,
};
use teloxide::{
    dispatching::dialogue::InMemStorage,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    update_listeners::webhooks::{self, Options},
};
use tracing::info;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
    let config = Arc::new(Config::from_env()?);

    LogTracer::init()?;
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&config.log_level)?)
        .with_span_events(FmtSpan::CLOSE)
        .with_line_number(true)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let connection = Arc::new(Connection::connect(&config.database_url).await?);
    connection.run_migrations().await?;

    let bank = Arc::new(QuestionBank::load(&config.questions_path)?);
    info!(
        questions = bank.len(),
        path = %config.questions_path.display(),
        "Question bank loaded"
    );

    let bot = Bot::with_client(&config.teloxide_token, teloxide::net::client_from_env());
    let presenter = Arc::new(TelegramPresenter::new(bot.clone()));
    let engine = Arc::new(QuizEngine::new(
        Arc::clone(&connection),
        bank,
        presenter.clone(),
        config.quiz.clone(),
    ));

    info!("Starting bot...");
    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![
            InMemStorage::<DialogueState>::new(),
            Arc::clone(&connection),
            engine,
            presenter,
            Arc::clone(&config)
        ])
        .enable_ctrlc_handler()
        .build();

    match config.webhook.clone() {
        Some(webhook) => {
            info!(addr = %webhook.addr, url = %webhook.url, "Receiving updates through a webhook");
            let listener = webhooks::axum(bot, Options::new(webhook.addr, webhook.url)).await?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        }
        None => dispatcher.dispatch().await,
    }

    connection.close().await;
    Ok(())
}
