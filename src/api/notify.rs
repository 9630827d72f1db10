/// Surface for user-visible failure messages. Passed in as a handle so
/// callers decide where messages go (terminal, log, test recorder).
pub trait Notifier: Send + Sync {
    fn error(&self, title: &str, description: &str);
}

/// Sends notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, title: &str, description: &str) {
        tracing::error!("{}: {}", title, description);
    }
}

/// Prints notifications to stderr so they don't interleave with streamed output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn error(&self, title: &str, description: &str) {
        tracing::debug!("notify: {}: {}", title, description);
        eprintln!("[{}] {}", title, description);
    }
}

#[cfg(test)]
pub use recording::RecordingNotifier;

#[cfg(test)]
mod recording {
    use std::sync::Mutex;

    use super::Notifier;

    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Notifier for RecordingNotifier {
        fn error(&self, title: &str, description: &str) {
            self.calls
                .lock()
                .unwrap()
                .push((title.to_string(), description.to_string()));
        }
    }
}
