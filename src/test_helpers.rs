//! Serialises process environment mutation across unit tests.

use std::env;

use tokio::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Holds the environment lock and removes the variables it set on drop.
pub struct EnvGuard {
    keys: Vec<&'static str>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets every `(key, value)` pair while holding the global lock.
    pub async fn set_vars(vars: &[(&'static str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut keys = Vec::with_capacity(vars.len());
        for (key, value) in vars {
            // SAFETY: ENV_LOCK serialises every test that touches the environment.
            unsafe { env::set_var(key, value) };
            keys.push(*key);
        }
        Self {
            keys,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            // SAFETY: the lock is still held until `_guard` drops after this.
            unsafe { env::remove_var(key) };
        }
    }
}
