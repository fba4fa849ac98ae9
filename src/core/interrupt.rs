//! Process-wide interrupt flag.
//!
//! A signal handler raises it; the key source, the input loop and the SQL
//! engine poll it, so a SIGINT or SIGTERM ends the session through the same
//! path as `exit` and history still gets flushed.
use super::{Result, ShellError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Interrupt::default()
    }

    /// Routes SIGINT, SIGTERM and SIGHUP to this flag. Can only be done once
    /// per process.
    pub fn install(&self) -> Result<()> {
        let interrupt = self.clone();
        ctrlc::set_handler(move || {
            info!("Termination signal received");
            interrupt.raise();
        })
        .map_err(|e| ShellError::App(format!("unable to install signal handler: {}", e)))
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let interrupt = Interrupt::new();
        let seen_by_engine = interrupt.clone();
        assert!(!seen_by_engine.is_raised());
        interrupt.raise();
        assert!(seen_by_engine.is_raised());
    }
}
