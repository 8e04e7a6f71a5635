//! This module contains the [Worker] type, a named thread that is joined when
//! its handle is dropped (RAII style).

use std::any::Any;
use std::io;
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Thread `{name}` panicked: {message}")]
    Panicked { name: String, message: String },
}

/// A named thread handle that joins the thread when dropped.
///
/// Any error in joining the thread on drop is ignored. Use [Self::join] to get
/// the thread's result.
#[derive(Debug)]
pub struct Worker<T> {
    name: String,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawn `f` on a new thread called `name`.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Result<Self, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map_err(|source| WorkerError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            handle: Some(handle),
        })
    }
}

impl<T> Worker<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread has finished running (without blocking).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// The ID of the worker thread.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|handle| handle.thread().id())
    }

    /// Whether this is being called from the worker thread itself.
    pub fn is_current_thread(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    /// Wait for the thread to finish and return what it returned.
    ///
    /// Joining from the worker thread itself would deadlock, so don't.
    pub fn join(mut self) -> Result<T, WorkerError> {
        let handle = self.handle.take().expect(EXPECT_MSG);
        handle.join().map_err(|payload| WorkerError::Panicked {
            name: self.name.clone(),
            message: panic_message(payload.as_ref()),
        })
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.thread().id() != thread::current().id()
        {
            _ = handle.join();
        }
    }
}

/// Get a readable message out of a panic payload. Payloads that aren't strings
/// become `"Unknown Error"`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("Unknown Error")
    }
}

const EXPECT_MSG: &str = "The handle should be present.";
