/// Runs a closure when dropped.
///
/// The closure runs at most once: on scope exit, while unwinding, or when the
/// future owning the guard is dropped.
#[must_use = "the closure runs when the guard is dropped"]
pub struct Deferred<F: FnOnce()> {
    action: Option<F>,
}

impl<F: FnOnce()> Drop for Deferred<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

/// Schedules `action` to run when the returned guard goes out of scope.
pub fn defer<F: FnOnce()>(action: F) -> Deferred<F> {
    Deferred {
        action: Some(action),
    }
}
