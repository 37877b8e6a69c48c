/// Per-chat conversation state. Only destructive admin commands need more
/// than one message, so everything else happens in `Idle`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DialogueState {
    #[default]
    Idle,
    ConfirmCleanup {
        days: u32,
    },
    ConfirmDeleteUser {
        user_id: i64,
    },
}
