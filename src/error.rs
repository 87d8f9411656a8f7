use thiserror::Error;

/// Failures the chain itself produces while running a stage.
///
/// A chain's error type `E` has to be buildable from this, see
/// [`Chain`](crate::Chain). `String` and `TaskError` itself work out of the
/// box; an application error enum can carry it as a `#[from]` variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task body panicked. Carries the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// Every handle to the stage's reporter went away before it was settled.
    #[error("reporter dropped without settling")]
    ReporterDropped,
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "non-string panic payload".to_owned(),
            },
        };
        TaskError::Panicked(message)
    }
}

impl From<TaskError> for String {
    fn from(err: TaskError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::TaskError;
    use std::error::Error;

    #[test]
    fn test_panic_payload_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(TaskError::from_panic(payload), TaskError::Panicked("boom".into()));

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 7)).unwrap_err();
        assert_eq!(
            TaskError::from_panic(payload),
            TaskError::Panicked("formatted 7".into())
        );
    }

    #[test]
    fn test_into_string_and_boxed() {
        let s: String = TaskError::ReporterDropped.into();
        assert_eq!(s, "reporter dropped without settling");
        let boxed: Box<dyn Error + Send + Sync> = TaskError::Panicked("x".into()).into();
        assert_eq!(boxed.to_string(), "task panicked: x");
    }
}
