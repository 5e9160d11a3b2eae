//! Frame and memory statistics.

/// GPU memory population counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryInfo {
    pub geometries: usize,
    pub textures: usize,
}

/// Per-frame draw counters, reset at the start of every top-level `render`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderCounters {
    pub frame: u64,
    pub calls: u64,
    pub triangles: u64,
    pub points: u64,
    pub lines: u64,
}

/// Renderer statistics: `memory` tracks live GPU objects, `render` the
/// current frame's draw activity, `programs` the linked-program population.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderInfo {
    pub memory: MemoryInfo,
    pub render: RenderCounters,
    pub programs: usize,
    /// When `false`, `render` counters accumulate across frames until the
    /// caller resets them.
    pub auto_reset: bool,
}

impl RenderInfo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            auto_reset: true,
            ..Self::default()
        }
    }

    /// Accounts one draw call of `count` elements in `mode`.
    pub fn update(&mut self, count: u64, mode: u32, instances: u64) {
        use crate::gl::consts as gl;
        self.render.calls += 1;
        let count = count * instances.max(1);
        match mode {
            gl::TRIANGLES => self.render.triangles += count / 3,
            gl::TRIANGLE_STRIP | gl::TRIANGLE_FAN => {
                self.render.triangles += count.saturating_sub(2);
            }
            gl::LINES => self.render.lines += count / 2,
            gl::LINE_STRIP => self.render.lines += count.saturating_sub(1),
            gl::LINE_LOOP => self.render.lines += count,
            gl::POINTS => self.render.points += count,
            _ => {}
        }
    }

    pub fn reset(&mut self) {
        self.render.calls = 0;
        self.render.triangles = 0;
        self.render.points = 0;
        self.render.lines = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::consts as gl;

    #[test]
    fn draw_accounting_by_mode() {
        let mut info = RenderInfo::new();
        info.update(36, gl::TRIANGLES, 1);
        info.update(10, gl::LINES, 1);
        info.update(7, gl::POINTS, 2);
        assert_eq!(info.render.calls, 3);
        assert_eq!(info.render.triangles, 12);
        assert_eq!(info.render.lines, 5);
        assert_eq!(info.render.points, 14);
        info.reset();
        assert_eq!(info.render.calls, 0);
    }
}
