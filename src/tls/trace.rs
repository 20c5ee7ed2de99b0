// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The `pre_get_certificate`/`post_get_certificate` trace hook taxonomy
//! (spec §4.G Design Note "Trace hook optionality"). Hooks are optional and
//! the adapter must never invoke one that was not supplied.

use std::any::Any;

/// Opaque value threaded from `pre_get_certificate` to the matching
/// `post_get_certificate` call (a timer handle, a request id, ...).
pub type TraceToken = Box<dyn Any + Send>;

/// Lifecycle hooks fired around every certificate-fetch callback
/// (`get_certificate` / `get_client_certificate`). Both are independently
/// optional; a missing hook is simply never called.
#[derive(Default)]
pub struct Trace {
    pre: Option<Box<dyn Fn(&str) -> TraceToken + Send + Sync>>,
    post: Option<Box<dyn Fn(&str, TraceToken) + Send + Sync>>,
}

impl Trace {
    /// No hooks installed.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Install both hooks.
    #[must_use]
    pub fn new(
        pre: impl Fn(&str) -> TraceToken + Send + Sync + 'static,
        post: impl Fn(&str, TraceToken) + Send + Sync + 'static,
    ) -> Self {
        Self {
            pre: Some(Box::new(pre)),
            post: Some(Box::new(post)),
        }
    }

    pub(crate) fn pre_get_certificate(&self, info: &str) -> Option<TraceToken> {
        self.pre.as_ref().map(|hook| hook(info))
    }

    pub(crate) fn post_get_certificate(&self, info: &str, token: Option<TraceToken>) {
        if let (Some(hook), Some(token)) = (&self.post, token) {
            hook(info, token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn absent_hooks_are_never_invoked() {
        let trace = Trace::none();
        let token = trace.pre_get_certificate("get_certificate");
        assert!(token.is_none());
        trace.post_get_certificate("get_certificate", token);
    }

    #[test]
    fn installed_hooks_fire_in_order() {
        let pre_calls = Arc::new(AtomicUsize::new(0));
        let post_calls = Arc::new(AtomicUsize::new(0));
        let pre_calls2 = pre_calls.clone();
        let post_calls2 = post_calls.clone();

        let trace = Trace::new(
            move |_info| {
                pre_calls2.fetch_add(1, Ordering::SeqCst);
                Box::new(42i32)
            },
            move |_info, token| {
                post_calls2.fetch_add(1, Ordering::SeqCst);
                assert_eq!(*token.downcast::<i32>().unwrap(), 42);
            },
        );

        let token = trace.pre_get_certificate("get_certificate");
        assert_eq!(pre_calls.load(Ordering::SeqCst), 1);
        trace.post_get_certificate("get_certificate", token);
        assert_eq!(post_calls.load(Ordering::SeqCst), 1);
    }
}
