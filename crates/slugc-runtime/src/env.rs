use std::env;
use std::ffi::OsString;

/// Temporarily sets or removes process environment variables, restoring the
/// previous values when dropped.
///
/// Mutating the environment is process-wide; callers must not hold two
/// overlapping guards for the same key on different threads.
#[derive(Debug, Default)]
pub struct ScopedEnv {
    saved: Vec<(String, Option<OsString>)>,
}

impl ScopedEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.remember(key);
        env::set_var(key, value);
        self
    }

    pub fn unset(&mut self, key: &str) -> &mut Self {
        self.remember(key);
        env::remove_var(key);
        self
    }

    fn remember(&mut self, key: &str) {
        if !self.saved.iter().any(|(k, _)| k == key) {
            self.saved.push((key.to_owned(), env::var_os(key)));
        }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            match value {
                Some(v) => env::set_var(&key, v),
                None => env::remove_var(&key),
            }
        }
    }
}
