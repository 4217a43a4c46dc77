// Unrecoverable diagnostics: programming errors, failed assertions and
// malformed required inputs all funnel through here. The default behaviour is
// to log and panic; a process can install a different hook once at startup
// (the demo binary maps the unwind to exit code -99).

use std::fmt;

use once_cell::sync::OnceCell;

type Hook = Box<dyn Fn(&str, &str) + Send + Sync>;

static HOOK: OnceCell<Hook> = OnceCell::new();

/// Installs a process-wide hook that runs before the fatal panic. Returns
/// false if a hook was already installed.
pub fn set_hook(hook: Hook) -> bool {
    HOOK.set(hook).is_ok()
}

/// Logs the diagnostic, runs the installed hook and panics. Never returns.
pub fn fatal(tag: &str, args: fmt::Arguments<'_>) -> ! {
    let msg = format!("{args}");
    error!("[{tag}] {msg}");
    if let Some(hook) = HOOK.get() {
        hook(tag, &msg);
    }
    panic!("[{tag}] {msg}");
}

/// Fatal diagnostic with a tag and a format string.
#[macro_export]
macro_rules! fatal {
    ($tag:expr, $($arg:tt)*) => {
        $crate::fatal::fatal($tag, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "[test] boom 42")]
    fn fatal_panics_with_tag_and_message() {
        fatal!("test", "boom {}", 42);
    }
}
