//! Zeroizing wrapper for token material held in memory

use std::fmt;

use zeroize::Zeroize;

use crate::redact;

/// A sensitive value. Debug and Display render a redacted form, and the
/// inner value is zeroized on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value. Call sites should be few and auditable.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Loggable preview of the value (`prefix6…suffix4` for long values).
    pub fn preview(&self) -> String {
        redact::mask(&self.0)
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_are_redacted() {
        let secret = Secret::new(String::from("rt-verylongrefreshtoken1234"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn expose_returns_inner() {
        let secret: Secret<String> = String::from("rt-abc").into();
        assert_eq!(secret.expose(), "rt-abc");
    }

    #[test]
    fn preview_masks_value() {
        let secret = Secret::new(String::from("rt-0123456789abcdef0123"));
        assert_eq!(secret.preview(), "rt-012…0123");

        let short = Secret::new(String::from("rt-x"));
        assert_eq!(short.preview(), redact::MASKED);
    }

    #[test]
    fn clone_is_independent() {
        let secret = Secret::new(String::from("keepme"));
        let cloned = secret.clone();
        drop(secret);
        assert_eq!(cloned.expose(), "keepme");
    }

    #[test]
    fn zeroizes_on_drop() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        #[derive(Clone)]
        struct Witness(Arc<AtomicBool>);

        impl Zeroize for Witness {
            fn zeroize(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let zeroed = Arc::new(AtomicBool::new(false));
        let secret = Secret::new(Witness(Arc::clone(&zeroed)));
        assert!(!zeroed.load(Ordering::SeqCst));
        drop(secret);
        assert!(zeroed.load(Ordering::SeqCst));
    }
}
