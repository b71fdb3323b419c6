/// Kotlin style `let`, used to keep long builder and query chains readable
/// without introducing temporaries.
pub trait LetAlso: Sized {
    /// Passes the value by ownership into `f` and returns its result.
    fn let_owned<R, F>(self, f: F) -> R
    where
        F: FnOnce(Self) -> R,
    {
        f(self)
    }
}

impl<T> LetAlso for T {}
