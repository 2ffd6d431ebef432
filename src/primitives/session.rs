// ============================================================================
// spark-context - Tracking Sessions
// run_and_track: callbacks that re-run when what they read changes
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::core::constants::*;
use crate::core::error::ContextError;
use crate::core::types::{AnyReaction, ReactionCore};
use crate::primitives::scope::Context;
use crate::reactivity::scheduling::reschedule;
use crate::reactivity::tracking::{destroy_reaction, register_reaction, run_tracked};

/// Session callback. Return `false` to stop tracking.
pub type SessionFn = Box<dyn FnMut(&Context) -> bool>;

pub(crate) struct TrackSession {
    core: ReactionCore,
    context: Context,
    /// Taken while running so a re-entrant update cannot alias it
    callback: RefCell<Option<SessionFn>>,
}

impl TrackSession {
    fn fire(&self) {
        if self.context.is_disposed() {
            destroy_reaction(self.id());
            return;
        }
        let Some(callback) = self.callback.borrow_mut().take() else {
            return;
        };

        self.mark_clean();
        self.set_flags(self.flags() | REACTION_IS_UPDATING);
        let mut running = Running {
            session: self,
            callback: Some(callback),
        };
        let keep = run_tracked(self, || {
            running
                .callback
                .as_mut()
                .is_some_and(|callback| callback(&self.context))
        });
        drop(running);

        if !keep {
            trace!(reaction = %self.id(), "session finished");
            destroy_reaction(self.id());
            return;
        }
        // Dirtied by its own writes while running
        if self.is_dirty() {
            reschedule(self.id(), self.is_grouped());
        }
    }
}

/// Puts the callback back and clears the updating flag, even when the
/// callback panics.
struct Running<'a> {
    session: &'a TrackSession,
    callback: Option<SessionFn>,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let session = self.session;
        session.set_flags(session.flags() & !REACTION_IS_UPDATING);
        *session.callback.borrow_mut() = self.callback.take();
    }
}

impl AnyReaction for TrackSession {
    fn core(&self) -> &ReactionCore {
        &self.core
    }

    fn update(&self) {
        self.fire();
    }
}

impl Context {
    /// Run `f` now, then again whenever an entry it read changes.
    ///
    /// Every run re-records what `f` reads, so the session always depends
    /// on its latest execution. Returning `false` ends the session; so does
    /// disposing this context.
    pub fn run_and_track(
        &self,
        f: impl FnMut(&Context) -> bool + 'static,
    ) -> Result<(), ContextError> {
        self.start_session(Box::new(f), SESSION)
    }

    /// Like [`Context::run_and_track`], but re-runs are deferred until
    /// [`Context::process_waiting`], coalescing any number of writes into a
    /// single run. The first run still happens immediately.
    pub fn run_and_track_grouped(
        &self,
        f: impl FnMut(&Context) -> bool + 'static,
    ) -> Result<(), ContextError> {
        self.start_session(Box::new(f), SESSION | GROUPED)
    }

    fn start_session(&self, callback: SessionFn, kind: u32) -> Result<(), ContextError> {
        self.ensure_live()?;
        let session = Rc::new(TrackSession {
            core: ReactionCore::new(kind, self.id()),
            context: *self,
            callback: RefCell::new(Some(callback)),
        });
        trace!(reaction = %session.id(), context = %self.id(), "session started");
        register_reaction(session.clone());
        session.fire();
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
