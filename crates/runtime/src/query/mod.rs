pub mod code_table;
pub mod tuple_stream;

/// Result of a non-blocking pull.
///
/// `WouldBlock` means "reschedule me": the caller must not retry until the request's
/// work signal fires. It is never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull<T> {
    Ready(T),
    WouldBlock,
    EndOfStream,
}

impl<T> Pull<T> {
    pub fn is_would_block(&self) -> bool {
        matches!(self, Pull::WouldBlock)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Pull<U> {
        match self {
            Pull::Ready(value) => Pull::Ready(f(value)),
            Pull::WouldBlock => Pull::WouldBlock,
            Pull::EndOfStream => Pull::EndOfStream,
        }
    }
}
