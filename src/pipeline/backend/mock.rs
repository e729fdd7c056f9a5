use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use super::{BackendError, GenerativeBackend, SchemaDescriptor};

type Handler = Box<dyn Fn(&str, &str, &SchemaDescriptor) -> Result<Value, BackendError> + Send + Sync>;

enum Script {
    Queue(VecDeque<Result<Value, BackendError>>),
    Handler(Handler),
}

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub user_payload: String,
    pub schema_name: &'static str,
}

/// Scripted backend for tests and dry runs. Replies are served from a queue
/// or computed by a handler; every call is recorded.
pub struct ScriptedBackend {
    script: Mutex<Script>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    /// Serve replies in order. Once the queue is empty every call fails.
    pub fn new(replies: Vec<Result<Value, BackendError>>) -> Self {
        Self {
            script: Mutex::new(Script::Queue(replies.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str, &str, &SchemaDescriptor) -> Result<Value, BackendError> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(Script::Handler(Box::new(handler))),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call with the same error.
    pub fn failing(error: BackendError) -> Self {
        Self::with_handler(move |_, _, _| Err(error.clone()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl GenerativeBackend for ScriptedBackend {
    fn complete(
        &self,
        system_prompt: &str,
        user_payload: &str,
        schema: &SchemaDescriptor,
    ) -> Result<Value, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                user_payload: user_payload.to_string(),
                schema_name: schema.name,
            });
        }

        let mut script = self
            .script
            .lock()
            .map_err(|_| BackendError::Connection("scripted backend poisoned".into()))?;
        match &mut *script {
            Script::Queue(queue) => queue.pop_front().unwrap_or_else(|| {
                Err(BackendError::Connection("scripted backend exhausted".into()))
            }),
            Script::Handler(handler) => handler(system_prompt, user_payload, schema),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new("test", json!({}))
    }

    #[test]
    fn queue_served_in_order_then_fails() {
        let backend = ScriptedBackend::new(vec![Ok(json!(1)), Ok(json!(2))]);
        assert_eq!(backend.complete("s", "a", &schema()).unwrap(), json!(1));
        assert_eq!(backend.complete("s", "b", &schema()).unwrap(), json!(2));
        assert!(backend.complete("s", "c", &schema()).is_err());
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.calls()[1].user_payload, "b");
    }

    #[test]
    fn handler_sees_schema_name() {
        let backend = ScriptedBackend::with_handler(|_, _, schema| Ok(json!(schema.name)));
        assert_eq!(backend.complete("s", "u", &schema()).unwrap(), json!("test"));
    }

    #[test]
    fn failing_backend_always_errors() {
        let backend = ScriptedBackend::failing(BackendError::RateLimited("slow down".into()));
        for _ in 0..3 {
            assert!(matches!(
                backend.complete("s", "u", &schema()),
                Err(BackendError::RateLimited(_))
            ));
        }
        assert_eq!(backend.call_count(), 3);
    }
}
