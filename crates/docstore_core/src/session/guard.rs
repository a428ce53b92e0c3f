//! Scope guards over a session.
//!
//! [`LocalTransaction`] starts a transaction only if none is running, so
//! helpers can be written transactionally without caring whether a caller
//! already opened one. [`TranslationScope`] switches the translation mode
//! and restores the previous mode on every exit path.

use std::ops::{Deref, DerefMut};

use crate::error::CoreResult;

use super::DocStoreSession;

/// A transaction owned by the current scope, if it started one.
///
/// Dropping the guard without [`LocalTransaction::commit`] rolls back a
/// transaction the guard started. A transaction started by a caller is left
/// alone in both cases.
pub struct LocalTransaction<'a> {
    session: &'a mut dyn DocStoreSession,
    started: bool,
    finished: bool,
}

impl<'a> LocalTransaction<'a> {
    /// Starts a transaction unless one is already running.
    ///
    /// # Errors
    ///
    /// Fails if the backend refuses to start a transaction.
    pub fn begin(session: &'a mut dyn DocStoreSession) -> CoreResult<Self> {
        let started = !session.running_transaction();
        if started {
            session.start_transaction()?;
        }
        Ok(Self {
            session,
            started,
            finished: false,
        })
    }

    /// Returns true if this guard started the transaction.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.started
    }

    /// Commits the transaction if this guard started it.
    ///
    /// # Errors
    ///
    /// Returns the commit error after rolling back.
    pub fn commit(mut self) -> CoreResult<()> {
        self.finished = true;
        if self.started && self.session.running_transaction() {
            if let Err(e) = self.session.commit_transaction() {
                if self.session.running_transaction() {
                    self.session.rollback_transaction();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Runs `f` inside a local transaction, committing on success.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` (after rolling back) or of the commit.
    pub fn run<T, E, F>(session: &'a mut dyn DocStoreSession, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn DocStoreSession) -> Result<T, E>,
        E: From<crate::error::CoreError>,
    {
        let tx = Self::begin(session)?;
        let value = f(&mut *tx.session)?;
        tx.commit()?;
        Ok(value)
    }
}

impl<'a> Deref for LocalTransaction<'a> {
    type Target = dyn DocStoreSession + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl<'a> DerefMut for LocalTransaction<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.session
    }
}

impl Drop for LocalTransaction<'_> {
    fn drop(&mut self) {
        if self.started && !self.finished && self.session.running_transaction() {
            tracing::debug!(session = self.session.session_id(), "rolling back local transaction");
            self.session.rollback_transaction();
        }
    }
}

/// Temporarily switches the session's translation mode.
pub struct TranslationScope<'a> {
    session: &'a mut dyn DocStoreSession,
    previous: Option<String>,
}

impl<'a> TranslationScope<'a> {
    /// Enters `lang` (or the original language for `None`).
    pub fn enter(session: &'a mut dyn DocStoreSession, lang: Option<&str>) -> Self {
        let previous = session.translation_mode().map(str::to_owned);
        match lang {
            Some(lang) => session.enter_translation_mode(lang),
            None => session.leave_translation_mode(),
        }
        Self { session, previous }
    }
}

impl<'a> Deref for TranslationScope<'a> {
    type Target = dyn DocStoreSession + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl<'a> DerefMut for TranslationScope<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.session
    }
}

impl Drop for TranslationScope<'_> {
    fn drop(&mut self) {
        match self.previous.as_deref() {
            Some(lang) => self.session.enter_translation_mode(lang),
            None => self.session.leave_translation_mode(),
        }
    }
}
