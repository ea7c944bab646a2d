use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rowsieve_error::{DbError, ErrorKind};

/// Why a token was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Downstream doesn't need any more input.
    ///
    /// Not an error, pipelines observing this should finish normally.
    InputNotNeeded,
    /// The query was canceled, either explicitly or because of an error.
    QueryCanceled,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputNotNeeded => write!(f, "input not needed"),
            Self::QueryCanceled => write!(f, "query canceled"),
        }
    }
}

/// Hierarchical cancellation token.
///
/// Canceling a token cancels all of its children. A child's reason is the
/// reason of the closest canceled ancestor, or its own if set.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    reason: Mutex<Option<CancelReason>>,
    parent: Option<CancellationToken>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a new root token.
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(TokenInner {
                reason: Mutex::new(None),
                parent: None,
            }),
        }
    }

    /// Create a child of this token.
    pub fn child(&self) -> Self {
        CancellationToken {
            inner: Arc::new(TokenInner {
                reason: Mutex::new(None),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this token and every descendant.
    ///
    /// The first reason set on a token sticks, except that `QueryCanceled`
    /// always overrides `InputNotNeeded`.
    pub fn cancel(&self, reason: CancelReason) {
        let mut current = self.inner.reason.lock();
        match *current {
            None | Some(CancelReason::InputNotNeeded) => *current = Some(reason),
            Some(CancelReason::QueryCanceled) => (),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.reason().is_some()
    }

    /// Get the reason this token was canceled.
    ///
    /// `QueryCanceled` anywhere in the ancestry takes precedence.
    pub fn reason(&self) -> Option<CancelReason> {
        let mut reason = None;
        let mut token = Some(self);

        while let Some(t) = token {
            match *t.inner.reason.lock() {
                Some(CancelReason::QueryCanceled) => return Some(CancelReason::QueryCanceled),
                Some(CancelReason::InputNotNeeded) => reason = Some(CancelReason::InputNotNeeded),
                None => (),
            }
            token = t.inner.parent.as_ref();
        }

        reason
    }

    /// Error to return when execution observes a canceled query.
    pub fn canceled_error() -> DbError {
        DbError::new("Query canceled").with_kind(ErrorKind::Canceled)
    }
}
