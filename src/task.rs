use core::{fmt::Display, future::Future};

/// Drives a detached task and logs how it ended, since the executor drops its output.
pub async fn supervise<E: Display>(name: &str, task: impl Future<Output = Result<(), E>>) -> Result<(), E> {
    let result = task.await;
    match &result {
        Ok(()) => log::warn!("{name} task finished"),
        Err(err) => log::error!("{name} task failed: {err}"),
    }
    result
}
