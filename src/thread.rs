//! Dedicated render thread.
//!
//! All command recording happens on one thread that owns the
//! [`CommandContext`]. Other threads enqueue closures; the queue is bounded,
//! so producers that outrun the render thread block instead of piling up
//! unbounded frames.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::context::CommandContext;
use crate::device::Device;
use crate::error::RhiError;

/// Work executed on the render thread.
pub type RenderTask = Box<dyn FnOnce(&mut CommandContext) + Send + 'static>;

/// Bound on queued, not-yet-executed tasks.
pub const TASK_QUEUE_DEPTH: usize = 256;

enum Message {
    Task(RenderTask),
    Shutdown,
}

/// Owns the render thread and its task queue.
pub struct RenderThread {
    sender: SyncSender<Message>,
    join: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Spawn the render thread with a fresh context over `device`.
    pub fn spawn(device: Arc<Device>) -> Result<Self, RhiError> {
        let (sender, receiver) = mpsc::sync_channel(TASK_QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("rhi-render".to_string())
            .spawn(move || {
                let mut context = CommandContext::new(device);
                while let Ok(message) = receiver.recv() {
                    match message {
                        Message::Task(task) => task(&mut context),
                        Message::Shutdown => break,
                    }
                }
                log::info!("Render thread exiting");
            })
            .map_err(|e| RhiError::Internal(format!("failed to spawn render thread: {}", e)))?;
        Ok(Self {
            sender,
            join: Some(join),
        })
    }

    /// Queue a task, blocking while the queue is full.
    pub fn enqueue(
        &self,
        task: impl FnOnce(&mut CommandContext) + Send + 'static,
    ) -> Result<(), RhiError> {
        self.sender
            .send(Message::Task(Box::new(task)))
            .map_err(|_| RhiError::Internal("render thread has exited".to_string()))
    }

    /// Queue a task without blocking; fails when the queue is full.
    pub fn try_enqueue(
        &self,
        task: impl FnOnce(&mut CommandContext) + Send + 'static,
    ) -> Result<(), RhiError> {
        self.sender
            .try_send(Message::Task(Box::new(task)))
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    RhiError::Internal("render task queue is full".to_string())
                }
                TrySendError::Disconnected(_) => {
                    RhiError::Internal("render thread has exited".to_string())
                }
            })
    }

    /// Queue a task and block until the render thread has run it.
    pub fn run_blocking<R: Send + 'static>(
        &self,
        task: impl FnOnce(&mut CommandContext) -> R + Send + 'static,
    ) -> Result<R, RhiError> {
        let (done, result) = mpsc::sync_channel(1);
        self.enqueue(move |context| {
            let _ = done.send(task(context));
        })?;
        result
            .recv()
            .map_err(|_| RhiError::Internal("render thread dropped a blocking task".to_string()))
    }

    /// Drain outstanding tasks and join the thread.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.sender.send(Message::Shutdown);
            if join.join().is_err() {
                log::error!("Render thread panicked during shutdown");
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl std::fmt::Debug for RenderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThread")
            .field("alive", &self.join.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;

    #[test]
    fn test_tasks_run_in_order() {
        let device = Device::new(BackendKind::None).unwrap();
        let thread = RenderThread::spawn(device).unwrap();

        let (sink, events) = mpsc::channel();
        for i in 0..4 {
            let sink = sink.clone();
            thread.enqueue(move |_| sink.send(i).unwrap()).unwrap();
        }
        thread.shutdown();
        let order: Vec<i32> = events.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_blocking_task_records_a_frame() {
        let device = Device::new(BackendKind::None).unwrap();
        let thread = RenderThread::spawn(device).unwrap();

        let submits = thread
            .run_blocking(|context| {
                context.begin().unwrap();
                context.draw(3, 0).unwrap();
                let handle = context.end().unwrap();
                context.execute(&handle).unwrap();
                context.advance_frame().unwrap();
                handle.gpu().submit_count()
            })
            .unwrap();
        assert_eq!(submits, 1);
    }

    #[test]
    fn test_enqueue_after_shutdown_fails() {
        let device = Device::new(BackendKind::None).unwrap();
        let thread = RenderThread::spawn(device).unwrap();
        let sender = thread.sender.clone();
        thread.shutdown();
        assert!(sender.send(Message::Shutdown).is_err());
    }
}
