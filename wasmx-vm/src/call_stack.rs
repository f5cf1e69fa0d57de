use wasmx_types::primitives::Address;

use crate::config::MAX_CALL_DEPTH;
use crate::error::VmError;

/// A single frame on the nested-call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// The contract whose code runs in this frame.
    pub contract: Address,
    /// The caller address for this frame.
    pub caller: Address,
    pub is_query: bool,
    /// Gas used before this frame was pushed.
    pub gas_before: u64,
}

/// Tracks the nested call chain of one transaction.
///
/// Contracts may re-enter each other; only the nesting depth is bounded.
#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<CallFrame>,
    max_depth: usize,
    /// Calls started so far, the outermost included.
    calls: u32,
}

impl CallStack {
    /// Create a new, empty call stack.
    pub fn new() -> Self {
        Self::with_max_depth(MAX_CALL_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
            calls: 0,
        }
    }

    /// Push a new frame onto the call stack.
    ///
    /// Returns an error if the maximum depth would be exceeded.
    pub fn push(&mut self, frame: CallFrame) -> Result<(), VmError> {
        let new_depth = self.frames.len() + 1;
        if new_depth > self.max_depth {
            return Err(VmError::CallDepthExceeded {
                depth: new_depth,
                max: self.max_depth,
            });
        }
        self.frames.push(frame);
        self.calls += 1;
        Ok(())
    }

    /// Pop the most recent frame from the call stack.
    pub fn pop(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// Current call depth (number of frames on the stack).
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Sequence number of the most recent call in this transaction.
    pub fn call_index(&self) -> u32 {
        self.calls
    }

    /// The caller address of the current (top) frame, if any.
    pub fn current_caller(&self) -> Option<Address> {
        self.frames.last().map(|f| f.caller)
    }

    /// Whether any open frame is a query.
    pub fn in_query(&self) -> bool {
        self.frames.iter().any(|f| f.is_query)
    }

    /// Whether the stack is empty (top-level call).
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(contract: Address, caller: Address) -> CallFrame {
        CallFrame {
            contract,
            caller,
            is_query: false,
            gas_before: 0,
        }
    }

    #[test]
    fn test_push_and_pop() {
        let mut stack = CallStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.depth(), 0);

        stack.push(make_frame([1u8; 20], [1u8; 20])).unwrap();
        assert_eq!(stack.depth(), 1);
        assert!(!stack.is_empty());

        let frame = stack.pop().unwrap();
        assert_eq!(frame.contract, [1u8; 20]);
        assert!(stack.is_empty());
        assert_eq!(stack.call_index(), 1);
    }

    #[test]
    fn test_depth_limit() {
        let mut stack = CallStack::with_max_depth(4);
        for i in 0..4u8 {
            stack.push(make_frame([i; 20], [1u8; 20])).unwrap();
        }
        assert_eq!(stack.depth(), 4);

        match stack.push(make_frame([9u8; 20], [1u8; 20])) {
            Err(VmError::CallDepthExceeded { depth, max }) => {
                assert_eq!(depth, 5);
                assert_eq!(max, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_reentry_allowed() {
        let mut stack = CallStack::new();
        stack.push(make_frame([1u8; 20], [0u8; 20])).unwrap();
        stack.push(make_frame([2u8; 20], [1u8; 20])).unwrap();
        assert!(stack.push(make_frame([1u8; 20], [2u8; 20])).is_ok());
    }

    #[test]
    fn test_current_caller() {
        let mut stack = CallStack::new();
        assert!(stack.current_caller().is_none());

        stack.push(make_frame([1u8; 20], [10u8; 20])).unwrap();
        assert_eq!(stack.current_caller(), Some([10u8; 20]));

        stack.push(make_frame([2u8; 20], [20u8; 20])).unwrap();
        assert_eq!(stack.current_caller(), Some([20u8; 20]));

        stack.pop();
        assert_eq!(stack.current_caller(), Some([10u8; 20]));
    }

    #[test]
    fn test_query_frames() {
        let mut stack = CallStack::new();
        stack.push(make_frame([1u8; 20], [0u8; 20])).unwrap();
        assert!(!stack.in_query());
        let mut frame = make_frame([2u8; 20], [1u8; 20]);
        frame.is_query = true;
        stack.push(frame).unwrap();
        assert!(stack.in_query());
        stack.pop();
        assert!(!stack.in_query());
    }

    #[test]
    fn test_pop_empty() {
        let mut stack = CallStack::new();
        assert!(stack.pop().is_none());
    }
}
