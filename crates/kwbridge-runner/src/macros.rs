//! Public macro helpers exported by `kwbridge-runner`.
//!
//! The macros stay available at the crate root via `#[macro_export]`.

/// Check a condition inside a test body and return its failure.
///
/// Expands to [`TestContext::check`](crate::TestContext::check) with the
/// condition's source text and line, followed by `?`, so the enclosing
/// function must return `Result<_, TestError>`. An optional format string
/// becomes the failure message.
///
/// # Examples
/// ```
/// use kwbridge_runner::{TestContext, TestError, check};
///
/// fn test_sum(ctx: &TestContext<'_>) -> Result<(), TestError> {
///     let total = 1 + 2;
///     check!(ctx, total == 3);
///     check!(ctx, total > 0, "total was {total}");
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! check {
    ($ctx:expr, $cond:expr $(,)?) => {
        $ctx.check(
            stringify!($cond),
            $cond,
            $crate::AssertOptions::default(),
            line!(),
        )?
    };
    ($ctx:expr, $cond:expr, $($msg:tt)+) => {
        $ctx.check(
            stringify!($cond),
            $cond,
            $crate::AssertOptions::message(format!($($msg)+)),
            line!(),
        )?
    };
}

/// Skip the running test.
///
/// Unwinds with a skip outcome, so it works from nested helpers that do not
/// return a `Result`.
#[macro_export]
macro_rules! skip {
    () => {
        $crate::skip("")
    };
    ($msg:expr $(,)?) => {
        $crate::skip(Into::<String>::into($msg))
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::skip(format!($fmt, $($arg)*))
    };
}
