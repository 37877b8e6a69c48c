use state::DialogueState;
use teloxide::{dispatching::dialogue::InMemStorage, prelude::Dialogue};

pub mod admin;
pub mod commands;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod keyboard;
pub mod presenter;
pub mod questions;
pub mod report;
pub mod runner;
pub mod schema;
pub mod session;
pub mod state;

type UserDialogue = Dialogue<DialogueState, InMemStorage<DialogueState>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
