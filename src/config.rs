use std::{collections::HashSet, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use dotenvy::dotenv;
use url::Url;

use crate::{engine::QuizSettings, error::ConfigError};

/// Process configuration, read from the environment.
///
/// The proxy descriptor is not part of this struct: teloxide picks up
/// `TELOXIDE_PROXY` itself when the HTTP client is built.
#[derive(Debug, Clone)]
pub struct Config {
    pub teloxide_token: String,
    pub database_url: String,
    pub questions_path: PathBuf,
    pub admin_ids: HashSet<i64>,
    pub log_level: String,
    pub quiz: QuizSettings,
    pub webhook: Option<Webhook>,
}

#[derive(Debug, Clone)]
pub struct Webhook {
    pub url: Url,
    pub addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let teloxide_token = lookup("TELOXIDE_TOKEN").ok_or(ConfigError::Missing("TELOXIDE_TOKEN"))?;

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://grammar_bot.db".to_owned());
        let questions_path = lookup("QUESTIONS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("questions.json"));
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let admin_ids = match lookup("ADMIN_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| parse("ADMIN_IDS", id))
                .collect::<Result<HashSet<i64>, _>>()?,
            None => HashSet::new(),
        };

        let defaults = QuizSettings::default();
        let quiz = QuizSettings {
            question_timeout: seconds(&lookup, "QUESTION_TIMEOUT_SECS")?
                .unwrap_or(defaults.question_timeout),
            countdown_secs: match lookup("COUNTDOWN_SECS") {
                Some(raw) => parse("COUNTDOWN_SECS", &raw)?,
                None => defaults.countdown_secs,
            },
            tick_interval: seconds(&lookup, "TICK_SECS")?.filter(|tick| !tick.is_zero()),
            start_timeout: seconds(&lookup, "START_TIMEOUT_SECS")?
                .unwrap_or(defaults.start_timeout),
        };

        if quiz.question_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "QUESTION_TIMEOUT_SECS",
                reason: "must be greater than zero".to_owned(),
            });
        }

        let webhook = match (lookup("WEBHOOK_URL"), lookup("WEBHOOK_ADDR")) {
            (Some(url), Some(addr)) => Some(Webhook {
                url: parse("WEBHOOK_URL", &url)?,
                addr: parse("WEBHOOK_ADDR", &addr)?,
            }),
            _ => None,
        };

        Ok(Self {
            teloxide_token,
            database_url,
            questions_path,
            admin_ids,
            log_level,
            quiz,
            webhook,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    lookup(name)
        .map(|raw| parse::<u64>(name, &raw).map(Duration::from_secs))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn token_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TELOXIDE_TOKEN")));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("TELOXIDE_TOKEN", "token")])).unwrap();

        assert_eq!(config.database_url, "sqlite://grammar_bot.db");
        assert_eq!(config.questions_path, PathBuf::from("questions.json"));
        assert_eq!(config.quiz.question_timeout, Duration::from_secs(30));
        assert_eq!(config.quiz.countdown_secs, 3);
        assert_eq!(config.quiz.tick_interval, None);
        assert!(config.admin_ids.is_empty());
        assert!(config.webhook.is_none());
    }

    #[test]
    fn admin_ids_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("TELOXIDE_TOKEN", "token"),
            ("ADMIN_IDS", "652429947, 42,"),
        ]))
        .unwrap();

        assert!(config.is_admin(652429947));
        assert!(config.is_admin(42));
        assert!(!config.is_admin(7));
    }

    #[test]
    fn non_numeric_timeout_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("TELOXIDE_TOKEN", "token"),
            ("QUESTION_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "QUESTION_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn zero_tick_disables_ticks() {
        let config = Config::from_lookup(lookup(&[
            ("TELOXIDE_TOKEN", "token"),
            ("TICK_SECS", "0"),
            ("QUESTION_TIMEOUT_SECS", "15"),
        ]))
        .unwrap();

        assert_eq!(config.quiz.tick_interval, None);
        assert_eq!(config.quiz.question_timeout, Duration::from_secs(15));
    }
}
