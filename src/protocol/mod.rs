pub mod envelope;
pub mod frame;

pub use envelope::{route, subscribe_frame, Liveness, Routed};
pub use frame::{FrameDemux, RECORD_SEPARATOR};
