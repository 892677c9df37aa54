//! Consumer callback dispatch
//!
//! Callbacks run under `catch_unwind`: a panicking consumer is logged and
//! never unwinds into the transport pump or the state machine.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::logging::{Logger, TraceLevel};

/// Receives every inbound message of the connected session
pub type MessageReceivedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked once per completed `stop`
pub type DisconnectedCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) fn invoke_message_received(
    logger: &Logger,
    callback: &MessageReceivedCallback,
    message: &str,
) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
        logger.log(
            TraceLevel::ERRORS,
            format!(
                "message_received callback threw an exception: {}",
                panic_message(payload.as_ref())
            ),
        );
    }
}

pub(crate) fn invoke_disconnected(logger: &Logger, callback: &DisconnectedCallback) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback())) {
        logger.log(
            TraceLevel::ERRORS,
            format!(
                "disconnected callback threw an exception: {}",
                panic_message(payload.as_ref())
            ),
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload.downcast_ref::<&str>().map_or_else(
        || {
            payload
                .downcast_ref::<String>()
                .map_or_else(|| "unknown panic".to_string(), ToString::to_string)
        },
        ToString::to_string,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogWriter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Errors(Mutex<Vec<String>>);

    impl LogWriter for Errors {
        fn write(&self, _level: TraceLevel, entry: &str) {
            self.0.lock().unwrap().push(entry.to_string());
        }
    }

    #[test]
    fn test_message_delivered() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: MessageReceivedCallback =
            Arc::new(move |m: &str| sink.lock().unwrap().push(m.to_string()));

        invoke_message_received(&Logger::tracing(TraceLevel::NONE), &callback, "hello");
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_panicking_message_callback_is_contained() {
        let errors = Arc::new(Errors::default());
        let logger = Logger::new(errors.clone(), TraceLevel::ERRORS);
        let callback: MessageReceivedCallback = Arc::new(|m: &str| panic!("bad message {}", m));

        invoke_message_received(&logger, &callback, "42");

        let entries = errors.0.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0],
            "message_received callback threw an exception: bad message 42"
        );
    }

    #[test]
    fn test_panicking_disconnected_callback_is_contained() {
        let errors = Arc::new(Errors::default());
        let logger = Logger::new(errors.clone(), TraceLevel::ERRORS);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: DisconnectedCallback = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        });

        invoke_disconnected(&logger, &callback);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            errors.0.lock().unwrap()[0],
            "disconnected callback threw an exception: boom"
        );
    }
}
