//! One-shot "first frame decoded" signal for the viewer.
//!
//! Every screen the viewer shows gets a generation number. The front-end
//! reports readiness for a generation once its player decodes a frame, and
//! anyone waiting on that generation wakes up exactly once: either because the
//! frame arrived or because the viewer already moved to another screen.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    pub generation: u64,
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWait {
    Ready,
    /// The screen changed before its first frame was reported.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct FirstFrame {
    tx: Arc<watch::Sender<FrameState>>,
}

impl Default for FirstFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl FirstFrame {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FrameState {
            generation: 0,
            ready: false,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> FrameState {
        *self.tx.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Starts a new screen and returns its generation. Waiters on older
    /// generations resolve as superseded.
    pub fn begin(&self) -> u64 {
        let mut next = 0;
        self.tx.send_modify(|state| {
            state.generation += 1;
            state.ready = false;
            next = state.generation;
        });
        next
    }

    /// Marks `generation` as showing video. Stale or repeated reports are
    /// ignored and return `false`.
    pub fn mark_ready(&self, generation: u64) -> bool {
        self.tx.send_if_modified(|state| {
            if state.generation == generation && !state.ready {
                state.ready = true;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once `generation` is ready or superseded.
    pub async fn wait(&self, generation: u64) -> FrameWait {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.generation != generation {
                return FrameWait::Superseded;
            }
            if state.ready {
                return FrameWait::Ready;
            }
            if rx.changed().await.is_err() {
                return FrameWait::Superseded;
            }
        }
    }
}
