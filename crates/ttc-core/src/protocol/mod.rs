//! Protocol module containing the frame codec and the outbound queue.

pub mod frame;
pub mod queue;

pub use frame::{decode_frame, encode_frame, parse_header, Frame, FrameError, FrameHeader};
pub use queue::{outbound_queue, Outbound, OutboundQueue, OutboundReceiver, QueueError};
