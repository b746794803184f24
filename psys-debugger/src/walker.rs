//! Frame-by-frame stack unwinding for a stopped thread.

use psys_common::Addr;

use crate::error::DebugError;
use crate::sys::{FrameCursor, Unwind};

/// One frame of a walked call stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// The frame's program counter.
    pub pc: Addr,
    /// The frame's frame pointer.
    pub fp: Addr,
}

/// An iterator producing a thread's stack frames, innermost first.
///
/// The walk is seeded from the thread's register context and advances
/// through the platform unwind service. It ends when the service reports no
/// more frames, when the program counter reaches zero, or when a step fails
/// to make progress. The thread being walked must be stopped, which the
/// debug-event model guarantees for threads of a process in a debug break.
pub struct StackWalk<U> {
    unwinder: U,
    cursor: FrameCursor,
    last_pc: Option<Addr>,
    done: bool,
}

impl<U: Unwind> StackWalk<U> {
    /// Starts a walk from the given register seed.
    pub fn new(unwinder: U, seed: FrameCursor) -> Self {
        StackWalk {
            unwinder,
            cursor: seed,
            last_pc: None,
            done: false,
        }
    }

    /// Collects the remaining frames into a vector.
    pub fn frames(self) -> Result<Vec<StackFrame>, DebugError> {
        self.collect()
    }
}

impl<U: Unwind> Iterator for StackWalk<U> {
    type Item = Result<StackFrame, DebugError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.unwinder.step(&mut self.cursor) {
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => {
                if self.cursor.pc.is_null() || self.last_pc == Some(self.cursor.pc) {
                    self.done = true;
                    return None;
                }

                self.last_pc = Some(self.cursor.pc);
                Some(Ok(StackFrame {
                    pc: self.cursor.pc,
                    fp: self.cursor.fp,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    /// Replays a fixed list of frames the way the OS service would.
    struct ScriptedUnwind {
        frames: Vec<(u64, u64)>,
        position: usize,
    }

    impl ScriptedUnwind {
        fn new(frames: &[(u64, u64)]) -> Self {
            ScriptedUnwind {
                frames: frames.to_vec(),
                position: 0,
            }
        }
    }

    impl Unwind for ScriptedUnwind {
        fn step(&mut self, cursor: &mut FrameCursor) -> Result<bool, DebugError> {
            match self.frames.get(self.position) {
                Some(&(pc, fp)) => {
                    self.position += 1;
                    cursor.pc = Addr(pc);
                    cursor.fp = Addr(fp);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    fn seed(pc: u64) -> FrameCursor {
        FrameCursor {
            pc: Addr(pc),
            sp: Addr(0x9000),
            fp: Addr(0x8000),
        }
    }

    #[test]
    fn test_walk_is_ordered_and_finite() {
        let unwind =
            ScriptedUnwind::new(&[(0x1010, 0x8000), (0x2020, 0x8100), (0x3030, 0x8200)]);
        let frames = StackWalk::new(unwind, seed(0x1010)).frames().unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].pc, Addr(0x1010));
        assert_eq!(frames[2].pc, Addr(0x3030));
    }

    #[test]
    fn test_first_frame_matches_context() {
        let unwind = ScriptedUnwind::new(&[(0x1010, 0x8000)]);
        let frames = StackWalk::new(unwind, seed(0x1010)).frames().unwrap();
        assert_eq!(frames[0].pc, seed(0x1010).pc);
    }

    #[test]
    fn test_zero_pc_terminates() {
        let unwind = ScriptedUnwind::new(&[(0x1010, 0x8000), (0, 0), (0x3030, 0x8200)]);
        let frames = StackWalk::new(unwind, seed(0x1010)).frames().unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_repeated_pc_terminates() {
        let unwind = ScriptedUnwind::new(&[(0x1010, 0x8000), (0x1010, 0x8000)]);
        let frames = StackWalk::new(unwind, seed(0x1010)).frames().unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_step_error_is_yielded() {
        struct FailingUnwind;

        impl Unwind for FailingUnwind {
            fn step(&mut self, _cursor: &mut FrameCursor) -> Result<bool, DebugError> {
                Err(DebugError::MissingState("context"))
            }
        }

        let mut walk = StackWalk::new(FailingUnwind, seed(0x1010));
        assert!(walk.next().unwrap().is_err());
        assert!(walk.next().is_none());
    }
}
