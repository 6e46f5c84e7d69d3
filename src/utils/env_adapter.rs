use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Overrides one environment variable until dropped, then puts back whatever
/// was there before. Mutation goes through a process-wide lock because
/// `set_var` is unsafe under edition 2024.
pub struct ScopedEnv {
    key: String,
    previous: Option<OsString>,
}

impl ScopedEnv {
    pub fn set(key: &str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        let _guard = env_lock();
        let previous = std::env::var_os(key);
        unsafe {
            std::env::set_var(key, value);
        }
        Self {
            key: key.to_string(),
            previous,
        }
    }

    pub fn unset(key: &str) -> Self {
        let _guard = env_lock();
        let previous = std::env::var_os(key);
        unsafe {
            std::env::remove_var(key);
        }
        Self {
            key: key.to_string(),
            previous,
        }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        let _guard = env_lock();
        unsafe {
            match &self.previous {
                Some(value) => std::env::set_var(&self.key, value),
                None => std::env::remove_var(&self.key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn override_is_undone_on_drop() {
        let key = "DEVTOOL_TEST_SCOPED_ENV";
        {
            let _env = ScopedEnv::set(key, "inner");
            assert_eq!(std::env::var(key).unwrap(), "inner");
        }
        assert!(std::env::var_os(key).is_none());
    }

    #[test]
    #[serial]
    fn nested_overrides_restore_outer_value() {
        let key = "DEVTOOL_TEST_SCOPED_ENV_NESTED";
        let _outer = ScopedEnv::set(key, "outer");
        {
            let _inner = ScopedEnv::unset(key);
            assert!(std::env::var_os(key).is_none());
        }
        assert_eq!(std::env::var(key).unwrap(), "outer");
    }
}
