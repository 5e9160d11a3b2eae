//! Poll-based asynchronous operations.
//!
//! Neither operation blocks on IO — both poll GPU progress. The host event
//! loop drives [`poll`](CompileTask::poll) until it stops returning
//! `Pending`; a convenience wrapper may adapt this to the host's async
//! primitive.

use std::rc::Rc;

use crate::error::RenderError;
use crate::gl::consts as gl;
use crate::gl::{BufferHandle, GlContext, SyncHandle};
use crate::renderer::programs::GlProgram;

/// Outcome of one poll.
pub enum TaskPoll<T> {
    Pending,
    Ready(T),
    Failed(RenderError),
}

/// Pending `compile_async`: resolves when every required program reports
/// link completion.
pub struct CompileTask {
    programs: Vec<Rc<GlProgram>>,
    /// Without `KHR_parallel_shader_compile` the caller should back off
    /// ~10 ms between polls; completion is then reported unconditionally.
    pub parallel: bool,
}

impl CompileTask {
    #[must_use]
    pub fn new(programs: Vec<Rc<GlProgram>>, parallel: bool) -> Self {
        Self { programs, parallel }
    }

    pub fn poll(&mut self, context: &impl GlContext) -> TaskPoll<()> {
        let all_done = self
            .programs
            .iter()
            .all(|p| context.program_completion_status(p.handle));
        if all_done {
            if self.programs.iter().any(|p| !p.link_ok) {
                return TaskPoll::Failed(RenderError::ProgramLinkFailed(
                    "one or more programs failed to link".to_string(),
                ));
            }
            TaskPoll::Ready(())
        } else {
            TaskPoll::Pending
        }
    }
}

/// Pending `read_render_target_pixels_async`: a pixel-pack readback fenced
/// by a sync object.
pub struct ReadPixelsTask {
    buffer: BufferHandle,
    sync: SyncHandle,
    byte_len: usize,
    finished: bool,
}

impl ReadPixelsTask {
    #[must_use]
    pub fn new(buffer: BufferHandle, sync: SyncHandle, byte_len: usize) -> Self {
        Self {
            buffer,
            sync,
            byte_len,
            finished: false,
        }
    }

    pub fn poll(&mut self, context: &impl GlContext) -> TaskPoll<Vec<u8>> {
        if self.finished {
            return TaskPoll::Failed(RenderError::TaskFailed(
                "read task polled after completion".to_string(),
            ));
        }
        match context.client_wait_sync(self.sync, gl::SYNC_FLUSH_COMMANDS_BIT, 0) {
            gl::TIMEOUT_EXPIRED => TaskPoll::Pending,
            gl::ALREADY_SIGNALED | gl::CONDITION_SATISFIED => {
                self.finished = true;
                let mut data = vec![0u8; self.byte_len];
                context.bind_buffer(gl::PIXEL_PACK_BUFFER, Some(self.buffer));
                context.get_buffer_sub_data(gl::PIXEL_PACK_BUFFER, 0, &mut data);
                context.bind_buffer(gl::PIXEL_PACK_BUFFER, None);
                context.delete_sync(self.sync);
                context.delete_buffer(self.buffer);
                TaskPoll::Ready(data)
            }
            status => {
                self.finished = true;
                context.delete_sync(self.sync);
                context.delete_buffer(self.buffer);
                TaskPoll::Failed(RenderError::TaskFailed(format!(
                    "clientWaitSync failed: {status:#06x}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::recording::RecordingContext;

    #[test]
    fn read_task_pends_until_fence_signals() {
        let ctx = RecordingContext::new();
        ctx.sync_polls_until_signaled.set(2);
        let buffer = ctx.create_buffer();
        let sync = ctx.fence_sync();
        let mut task = ReadPixelsTask::new(buffer, sync, 16);

        assert!(matches!(task.poll(&ctx), TaskPoll::Pending));
        assert!(matches!(task.poll(&ctx), TaskPoll::Pending));
        match task.poll(&ctx) {
            TaskPoll::Ready(data) => assert_eq!(data.len(), 16),
            _ => panic!("expected Ready"),
        }
        assert_eq!(ctx.count_calls("deleteSync"), 1);
        assert_eq!(ctx.count_calls("deleteBuffer"), 1);
    }
}
