use bitflags::bitflags;

bitflags! {
    /// Flags associated with a `Msg` indicating its role or attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u8 {
        /// More message parts follow this one.
        const MORE = 0b01;
        /// Internal: Indicates a protocol command frame.
        const COMMAND = 0b10;
        /// Internal: termination sentinel written into a pipe's queue.
        /// Never exposed to user code; consumed by the pipe reader.
        const DELIMITER = 0b100;
    }
}
