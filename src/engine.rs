//! The quiz state machine.
//!
//! A session moves `NotStarted -> AwaitingAnswer(0) -> ... -> Completed`.
//! Button clicks and timer expirations both feed the same transition, and
//! both run under the session's lock, so for any question exactly one of
//! them gets to record the `UserAnswer`. A timer only acts if the
//! [`TimerToken`] it was armed with still matches the session.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    database::{
        connection::{PurgeUsers, RecordAnswer, RecordAttempt, RegisterUser},
        models::{NewAnswer, QuizAttempt, User, UserProfile},
        Connection,
    },
    error::QuizError,
    presenter::{QuestionView, QuizPresenter},
    questions::QuestionBank,
    session::{Phase, Session, SessionHandle, SessionRegistry, TimerToken},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSettings {
    pub question_timeout: Duration,
    pub countdown_secs: u32,
    pub tick_interval: Option<Duration>,
    pub start_timeout: Duration,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            question_timeout: Duration::from_secs(30),
            countdown_secs: 3,
            tick_interval: None,
            start_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedQuiz {
    pub attempt_id: Uuid,
    pub question_count: usize,
    pub time_limit: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerReceipt {
    pub is_correct: bool,
    /// Set when this answer finished the quiz.
    pub completed: Option<QuizAttempt>,
}

pub struct QuizEngine {
    registry: SessionRegistry,
    connection: Arc<Connection>,
    bank: Arc<QuestionBank>,
    presenter: Arc<dyn QuizPresenter>,
    settings: QuizSettings,
}

impl QuizEngine {
    pub fn new(
        connection: Arc<Connection>,
        bank: Arc<QuestionBank>,
        presenter: Arc<dyn QuizPresenter>,
        settings: QuizSettings,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            connection,
            bank,
            presenter,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &QuizSettings {
        &self.settings
    }

    #[instrument(level = "info", skip(self, profile), fields(user_id = profile.user_id))]
    pub async fn register_user(&self, profile: &UserProfile) -> Result<User, QuizError> {
        self.connection.upsert_user(profile, Utc::now()).await
    }

    /// Ends any active session of the user and purges their records.
    #[instrument(level = "info", skip(self))]
    pub async fn delete_user(&self, user_id: i64) -> Result<u64, QuizError> {
        if let Some(handle) = self.registry.get(user_id) {
            let mut session = handle.lock().await;
            self.discard(&mut session);
            drop(session);

            info!("Active quiz cancelled");
            if let Err(e) = self.presenter.cancelled(user_id).await {
                warn!(error = %e, "Failed to report cancelled quiz");
            }
        }
        self.connection.delete_user(user_id).await
    }

    /// Registers the user, then opens a session and its attempt.
    #[instrument(level = "info", skip(self, profile), fields(user_id = profile.user_id))]
    pub async fn try_start(self: &Arc<Self>, profile: &UserProfile) -> Result<StartedQuiz, QuizError> {
        self.connection.upsert_user(profile, Utc::now()).await?;

        let mut session = self
            .registry
            .try_start(profile.user_id, self.bank.shuffled())?;
        let attempt_id = session.attempt_id();

        if let Err(e) = self
            .connection
            .create_attempt(attempt_id, profile.user_id, session.started_at())
            .await
        {
            error!(error = %e, "Failed to persist quiz attempt");
            self.discard(&mut session);
            return Err(e);
        }

        let started = StartedQuiz {
            attempt_id,
            question_count: session.question_count(),
            time_limit: self.settings.question_timeout,
        };
        drop(session);

        self.arm_start_timeout(profile.user_id, attempt_id);
        info!(%attempt_id, questions = started.question_count, "Quiz session created");

        Ok(started)
    }

    /// Runs the countdown, then shows the first question.
    #[instrument(level = "info", skip(self))]
    pub async fn begin(self: &Arc<Self>, user_id: i64) -> Result<(), QuizError> {
        let handle = self.active_session(user_id)?;
        let attempt_id = {
            let mut session = handle.lock().await;
            if !session.claim_countdown() {
                return Err(QuizError::StaleSubmission);
            }
            session.attempt_id()
        };

        for remaining in (1..=self.settings.countdown_secs).rev() {
            if let Err(e) = self.presenter.countdown(user_id, remaining).await {
                warn!(error = %e, "Failed to show countdown");
            }
            sleep(Duration::from_secs(1)).await;
        }

        self.start_attempt(user_id, Some(attempt_id)).await
    }

    /// `NotStarted -> AwaitingAnswer(0)`.
    pub async fn start(self: &Arc<Self>, user_id: i64) -> Result<(), QuizError> {
        self.start_attempt(user_id, None).await
    }

    async fn start_attempt(
        self: &Arc<Self>,
        user_id: i64,
        expected: Option<Uuid>,
    ) -> Result<(), QuizError> {
        let handle = self.active_session(user_id)?;
        let mut session = handle.lock().await;

        if session.phase() != Phase::NotStarted
            || expected.is_some_and(|attempt_id| attempt_id != session.attempt_id())
        {
            return Err(QuizError::StaleSubmission);
        }

        info!(attempt_id = %session.attempt_id(), "Quiz started");
        self.present(&mut session, 0).await;
        Ok(())
    }

    #[instrument(level = "info", skip(self))]
    pub async fn submit_answer(
        self: &Arc<Self>,
        user_id: i64,
        question_index: usize,
        selected_option: usize,
    ) -> Result<AnswerReceipt, QuizError> {
        let handle = self.active_session(user_id)?;
        let mut session = handle.lock().await;

        if !session.accepts_answer(question_index) {
            debug!(current = ?session.current_index(), "Stale answer");
            return Err(QuizError::StaleSubmission);
        }

        let question = session
            .question(question_index)
            .ok_or(QuizError::StaleSubmission)?;
        if selected_option >= question.options().len() {
            return Err(QuizError::InvalidArgument(format!(
                "Option {selected_option} does not exist."
            )));
        }

        let is_correct = question.is_correct(selected_option);
        let answer = NewAnswer::answered(
            session.attempt_id(),
            question_index,
            question.id(),
            selected_option,
            is_correct,
            Utc::now(),
        );

        session.invalidate();
        if let Err(e) = self.connection.record_answer(&answer).await {
            error!(error = %e, "Failed to record answer");
            self.fail(&mut session, &e).await;
            return Err(e);
        }
        info!(question_index, selected_option, is_correct, "Answer recorded");

        let completed = self.advance(&mut session, question_index).await?;
        Ok(AnswerReceipt {
            is_correct,
            completed,
        })
    }

    /// Records a non-answer for the question `token` was armed for, unless
    /// that question was already answered or superseded.
    #[instrument(level = "debug", skip(self))]
    pub async fn handle_timeout(
        self: &Arc<Self>,
        user_id: i64,
        token: TimerToken,
    ) -> Result<(), QuizError> {
        let handle = self
            .registry
            .get(user_id)
            .ok_or(QuizError::StaleSubmission)?;
        let mut session = handle.lock().await;

        if !session.accepts_timeout(&token) {
            return Err(QuizError::StaleSubmission);
        }

        let question_id = session
            .question(token.question_index)
            .map(|question| question.id())
            .ok_or(QuizError::StaleSubmission)?;
        let answer = NewAnswer::timed_out(session.attempt_id(), token.question_index, question_id);

        session.invalidate();
        if let Err(e) = self.connection.record_answer(&answer).await {
            error!(error = %e, "Failed to record timeout");
            self.fail(&mut session, &e).await;
            return Err(e);
        }
        info!(question_index = token.question_index, "Question timed out");

        self.advance(&mut session, token.question_index).await?;
        Ok(())
    }

    /// Drops a session that was never started. Returns whether it did.
    #[instrument(level = "info", skip(self))]
    pub async fn expire_unstarted(&self, user_id: i64, attempt_id: Uuid) -> bool {
        let Some(handle) = self.registry.get(user_id) else {
            return false;
        };
        let mut session = handle.lock().await;

        if session.attempt_id() != attempt_id
            || session.phase() != Phase::NotStarted
            || session.countdown_started()
        {
            return false;
        }

        self.discard(&mut session);
        info!("Unstarted quiz expired");
        if let Err(e) = self.presenter.expired(user_id).await {
            warn!(error = %e, "Failed to report expired quiz");
        }
        true
    }

    fn active_session(&self, user_id: i64) -> Result<SessionHandle, QuizError> {
        self.registry
            .get(user_id)
            .ok_or_else(|| QuizError::NotFound("Active quiz".to_owned()))
    }

    async fn advance(
        self: &Arc<Self>,
        session: &mut Session,
        answered_index: usize,
    ) -> Result<Option<QuizAttempt>, QuizError> {
        let next = answered_index + 1;
        if next < session.question_count() {
            self.present(session, next).await;
            Ok(None)
        } else {
            self.complete(session).await.map(Some)
        }
    }

    async fn present(self: &Arc<Self>, session: &mut Session, index: usize) {
        let token = session.present(index);
        let user_id = session.user_id();

        if let Some(question) = session.question(index) {
            let view = QuestionView {
                index,
                total: session.question_count(),
                question,
                time_limit: self.settings.question_timeout,
            };
            if let Err(e) = self.presenter.question(user_id, view).await {
                warn!(error = %e, question_index = index, "Failed to present question");
            }
        }

        self.arm_timeout(user_id, token);
    }

    async fn complete(&self, session: &mut Session) -> Result<QuizAttempt, QuizError> {
        let end_time = Utc::now().max(session.started_at());
        let attempt = match self
            .connection
            .complete_attempt(session.attempt_id(), session.question_count(), end_time)
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(error = %e, "Failed to complete quiz attempt");
                self.fail(session, &e).await;
                return Err(e);
            }
        };
        session.complete();
        self.registry
            .end_attempt(session.user_id(), session.attempt_id());
        info!(
            score = attempt.score,
            total = attempt.total_questions,
            "Quiz completed"
        );

        if let Err(e) = self.presenter.completed(session.user_id(), &attempt).await {
            warn!(error = %e, "Failed to report quiz result");
        }
        Ok(attempt)
    }

    /// Terminates the session without completing its attempt.
    fn discard(&self, session: &mut Session) {
        session.complete();
        self.registry
            .end_attempt(session.user_id(), session.attempt_id());
    }

    /// Discards the session and tells the user it could not go on.
    async fn fail(&self, session: &mut Session, error: &QuizError) {
        self.discard(session);
        if let Err(e) = self.presenter.failed(session.user_id(), error).await {
            warn!(error = %e, "Failed to report quiz failure");
        }
    }

    fn arm_timeout(self: &Arc<Self>, user_id: i64, token: TimerToken) {
        let engine = Arc::clone(self);
        let delay = self.settings.question_timeout;
        tokio::spawn(async move {
            sleep(delay).await;
            match engine.handle_timeout(user_id, token).await {
                Ok(()) => {}
                Err(QuizError::StaleSubmission) => {
                    debug!(user_id, ?token, "Timer expired for a settled question")
                }
                Err(e) => error!(user_id, error = %e, "Timeout handling failed"),
            }
        });

        if let Some(interval) = self.settings.tick_interval {
            let engine = Arc::clone(self);
            tokio::spawn(async move { engine.run_ticks(user_id, token, interval).await });
        }
    }

    async fn run_ticks(self: Arc<Self>, user_id: i64, token: TimerToken, interval: Duration) {
        let deadline = Instant::now() + self.settings.question_timeout;
        loop {
            sleep(interval).await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let Some(handle) = self.registry.get(user_id) else {
                break;
            };
            let session = handle.lock().await;
            if !session.accepts_timeout(&token) {
                break;
            }
            if let Err(e) = self
                .presenter
                .tick(user_id, token.question_index, remaining)
                .await
            {
                warn!(error = %e, "Failed to show remaining time");
            }
        }
    }

    fn arm_start_timeout(self: &Arc<Self>, user_id: i64, attempt_id: Uuid) {
        let engine = Arc::clone(self);
        let delay = self.settings.start_timeout;
        tokio::spawn(async move {
            sleep(delay).await;
            engine.expire_unstarted(user_id, attempt_id).await;
        });
    }
}
