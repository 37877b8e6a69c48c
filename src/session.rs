use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as SessionLock, OwnedMutexGuard};
use uuid::Uuid;

use crate::{error::QuizError, questions::Question};

/// Shared handle to a registered session. Every mutation of a session goes
/// through its lock, so events for one user are applied one at a time.
pub type SessionHandle = Arc<SessionLock<Session>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    AwaitingAnswer(usize),
    Completed,
}

/// Identifies one presentation of one question. A timer carries the token it
/// was armed with and is ignored once the session has moved past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub attempt_id: Uuid,
    pub question_index: usize,
    pub generation: u64,
}

#[derive(Debug)]
pub struct Session {
    user_id: i64,
    attempt_id: Uuid,
    started_at: DateTime<Utc>,
    questions: Vec<Question>,
    phase: Phase,
    generation: u64,
    countdown_started: bool,
}

impl Session {
    fn new(user_id: i64, questions: Vec<Question>) -> Self {
        Self {
            user_id,
            attempt_id: Uuid::new_v4(),
            started_at: Utc::now(),
            questions,
            phase: Phase::NotStarted,
            generation: 0,
            countdown_started: false,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.phase {
            Phase::AwaitingAnswer(index) => Some(index),
            _ => None,
        }
    }

    /// Token for the question currently awaiting an answer.
    pub fn timer_token(&self) -> Option<TimerToken> {
        self.current_index().map(|question_index| TimerToken {
            attempt_id: self.attempt_id,
            question_index,
            generation: self.generation,
        })
    }

    pub fn accepts_answer(&self, question_index: usize) -> bool {
        self.current_index() == Some(question_index)
    }

    pub fn accepts_timeout(&self, token: &TimerToken) -> bool {
        token.attempt_id == self.attempt_id
            && token.generation == self.generation
            && self.accepts_answer(token.question_index)
    }

    /// Marks the pre-quiz countdown as running; false if it already was or
    /// the quiz is past the start.
    pub(crate) fn claim_countdown(&mut self) -> bool {
        if self.phase != Phase::NotStarted || self.countdown_started {
            return false;
        }
        self.countdown_started = true;
        true
    }

    pub(crate) fn countdown_started(&self) -> bool {
        self.countdown_started
    }

    /// Moves to `question_index` under a new generation.
    pub(crate) fn present(&mut self, question_index: usize) -> TimerToken {
        self.generation += 1;
        self.phase = Phase::AwaitingAnswer(question_index);
        TimerToken {
            attempt_id: self.attempt_id,
            question_index,
            generation: self.generation,
        }
    }

    /// Makes every outstanding timer stale without moving the index.
    pub(crate) fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub(crate) fn complete(&mut self) {
        self.generation += 1;
        self.phase = Phase::Completed;
    }
}

#[derive(Debug)]
struct Registered {
    attempt_id: Uuid,
    session: SessionHandle,
}

/// Owns every active session, at most one per user.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<i64, Registered>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<i64, Registered>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new session for `user_id` unless one exists.
    ///
    /// The session comes back already locked: nobody else can act on it
    /// until the caller has finished setting it up and drops the guard.
    pub fn try_start(
        &self,
        user_id: i64,
        questions: Vec<Question>,
    ) -> Result<OwnedMutexGuard<Session>, QuizError> {
        let mut sessions = self.sessions();
        let Entry::Vacant(slot) = sessions.entry(user_id) else {
            return Err(QuizError::AlreadyActive);
        };

        let session = Arc::new(SessionLock::new(Session::new(user_id, questions)));
        // A lock created a line above has no other holder yet.
        let guard = Arc::clone(&session)
            .try_lock_owned()
            .map_err(|_| QuizError::AlreadyActive)?;
        slot.insert(Registered {
            attempt_id: guard.attempt_id(),
            session,
        });

        Ok(guard)
    }

    pub fn get(&self, user_id: i64) -> Option<SessionHandle> {
        self.sessions()
            .get(&user_id)
            .map(|registered| Arc::clone(&registered.session))
    }

    /// Removes the user's session, if any.
    pub fn end(&self, user_id: i64) {
        self.sessions().remove(&user_id);
    }

    /// Removes the user's session only if it still belongs to `attempt_id`.
    pub(crate) fn end_attempt(&self, user_id: i64, attempt_id: Uuid) {
        let mut sessions = self.sessions();
        if sessions
            .get(&user_id)
            .is_some_and(|registered| registered.attempt_id == attempt_id)
        {
            sessions.remove(&user_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn questions() -> Vec<Question> {
        (0..3)
            .map(|id| Question::new(id, format!("Q{id}"), vec!["a".into(), "b".into()], 0))
            .collect()
    }

    #[test]
    fn second_start_for_the_same_user_is_rejected() {
        let registry = SessionRegistry::new();

        let first = registry.try_start(1, questions()).unwrap();
        assert!(matches!(
            registry.try_start(1, questions()),
            Err(QuizError::AlreadyActive)
        ));
        assert!(registry.try_start(2, questions()).is_ok());

        assert_eq!(registry.len(), 2);
        assert_eq!(first.phase(), Phase::NotStarted);
    }

    #[test]
    fn end_is_idempotent() {
        let registry = SessionRegistry::new();
        drop(registry.try_start(1, questions()).unwrap());

        registry.end(1);
        registry.end(1);
        registry.end(42);

        assert!(registry.get(1).is_none());
        assert!(registry.try_start(1, questions()).is_ok());
    }

    #[test]
    fn end_attempt_leaves_a_newer_session_alone() {
        let registry = SessionRegistry::new();
        let old = registry.try_start(1, questions()).unwrap().attempt_id();
        registry.end(1);
        let new = registry.try_start(1, questions()).unwrap().attempt_id();

        registry.end_attempt(1, old);
        assert!(registry.get(1).is_some());

        registry.end_attempt(1, new);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn started_session_is_locked_until_released() {
        let registry = SessionRegistry::new();
        let guard = registry.try_start(1, questions()).unwrap();

        let handle = registry.get(1).unwrap();
        assert!(handle.try_lock().is_err());

        drop(guard);
        assert!(handle.try_lock().is_ok());
    }

    #[test]
    fn presenting_invalidates_older_tokens() {
        let registry = SessionRegistry::new();
        let mut session = registry.try_start(1, questions()).unwrap();
        assert_eq!(session.timer_token(), None);

        let first = session.present(0);
        assert!(session.accepts_timeout(&first));
        assert!(session.accepts_answer(0));
        assert!(!session.accepts_answer(1));

        session.invalidate();
        assert!(!session.accepts_timeout(&first));
        assert!(session.accepts_answer(0));

        let second = session.present(1);
        assert!(!session.accepts_timeout(&first));
        assert!(session.accepts_timeout(&second));
        assert_eq!(session.timer_token(), Some(second));

        let foreign = TimerToken {
            attempt_id: Uuid::new_v4(),
            ..second
        };
        assert!(!session.accepts_timeout(&foreign));

        session.complete();
        assert!(!session.accepts_timeout(&second));
        assert_eq!(session.current_index(), None);
    }

    #[test]
    fn countdown_can_be_claimed_once() {
        let registry = SessionRegistry::new();
        let mut session = registry.try_start(1, questions()).unwrap();

        assert!(session.claim_countdown());
        assert!(!session.claim_countdown());
        assert!(session.countdown_started());
    }
}
