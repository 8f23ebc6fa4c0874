//! HDLC framing

pub mod address;
pub mod fcs;
pub mod frame;
pub mod parameters;

pub use address::{reserved, HdlcAddress};
pub use fcs::{fcs16, FcsCalc};
pub use frame::{is_frame_complete, FrameType, HdlcFrame, FLAG, LLC_REQUEST, LLC_RESPONSE};
pub use parameters::LinkParameters;
