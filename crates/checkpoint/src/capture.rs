//! Deferred, memoized capture of checkpoint state

use runtime_core::CheckpointState;

/// State captured at most once per save attempt.
///
/// Starts `Unevaluated` holding the producer and moves to `Evaluated` the
/// first time the state is requested. A producer returning `None` is a
/// process opting out of this checkpoint.
pub enum StateCapture<F> {
    Unevaluated(Option<F>),
    Evaluated(Option<CheckpointState>),
}

impl<F> StateCapture<F>
where
    F: FnOnce() -> Option<CheckpointState>,
{
    pub fn new(producer: F) -> Self {
        StateCapture::Unevaluated(Some(producer))
    }

    /// Run the producer if it has not run yet and return its result
    pub fn get(&mut self) -> Option<&CheckpointState> {
        if let StateCapture::Unevaluated(producer) = self {
            let state = producer.take().and_then(|produce| produce());
            *self = StateCapture::Evaluated(state);
        }

        match self {
            StateCapture::Evaluated(state) => state.as_ref(),
            StateCapture::Unevaluated(_) => None,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self, StateCapture::Evaluated(_))
    }

    /// Consume the capture, running the producer if needed
    pub fn into_state(mut self) -> Option<CheckpointState> {
        self.get();
        match self {
            StateCapture::Evaluated(state) => state,
            StateCapture::Unevaluated(_) => None,
        }
    }
}

impl StateCapture<fn() -> Option<CheckpointState>> {
    /// A capture that already holds its result
    pub fn ready(state: Option<CheckpointState>) -> Self {
        StateCapture::Evaluated(state)
    }
}
