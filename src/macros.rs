// ============================================================================
// spark-context - Ergonomic Macros
// ============================================================================

/// Helper macro to clone variables into a move closure.
///
/// This reduces the boilerplate of manually cloning `Rc` handles before
/// moving them into a session callback or computed function.
///
/// # Usage
///
/// ```rust
/// use spark_context::{cloned, Context};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let ctx = Context::create();
/// let runs = Rc::new(Cell::new(0));
///
/// ctx.run_and_track(cloned!(runs => move |_| {
///     runs.set(runs.get() + 1);
///     true
/// }))
/// .unwrap();
/// assert_eq!(runs.get(), 1);
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}

/// Start a tracking session with automatic variable capturing.
///
/// Wraps `ctx.run_and_track(cloned!(... => move |c| { ...; true }))`: the
/// session keeps running until its context is disposed.
///
/// # Usage
///
/// ```rust
/// use spark_context::{track, Context};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let ctx = Context::create();
/// ctx.set("title", "draft").unwrap();
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// track!(ctx, seen => |c| {
///     if let Some(title) = c.get_as::<&str>("title") {
///         seen.borrow_mut().push(*title);
///     }
/// })
/// .unwrap();
///
/// ctx.set("title", "final").unwrap();
/// assert_eq!(*seen.borrow(), vec!["draft", "final"]);
/// ```
#[macro_export]
macro_rules! track {
    // Case 1: With captured variables
    ($ctx:expr, $($deps:ident),+ => |$c:ident| $body:expr) => {
        $ctx.run_and_track($crate::cloned!($($deps),+ => move |$c: &$crate::Context| {
            $body;
            true
        }))
    };
    // Case 2: Nothing captured
    ($ctx:expr => |$c:ident| $body:expr) => {
        $ctx.run_and_track(move |$c: &$crate::Context| {
            $body;
            true
        })
    };
}
