//! The `dumpcontext` hook: serializes a request and its outcome to an
//! observability sink when `ephemerals.dumpcontext` asks for it.
//!
//! This crate has no file system or network sink of its own, so the sink is
//! a caller-supplied callback. `now` firing once and resetting to `off` is
//! documented in DESIGN.md as the caller's responsibility.

use serde::Serialize;

use crate::ephemerals::DumpContextMode;

pub trait DumpSink: Send + Sync {
    fn dump(&self, label: &str, payload: serde_json::Value);
}

/// Decides whether a dump should happen for this attempt, given the mode and
/// whether the attempt errored.
pub fn should_dump(mode: DumpContextMode, is_error: bool) -> bool {
    match mode {
        DumpContextMode::Off => false,
        DumpContextMode::On => true,
        DumpContextMode::Error => is_error,
        DumpContextMode::Now => true,
    }
}

pub fn dump<T: Serialize>(sink: &dyn DumpSink, label: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(payload) => sink.dump(label, payload),
        Err(error) => log::warn!("dumpcontext: failed to serialize {label}: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mode_only_dumps_on_error() {
        assert!(!should_dump(DumpContextMode::Error, false));
        assert!(should_dump(DumpContextMode::Error, true));
    }

    #[test]
    fn on_and_now_always_dump() {
        assert!(should_dump(DumpContextMode::On, false));
        assert!(should_dump(DumpContextMode::Now, false));
    }
}
