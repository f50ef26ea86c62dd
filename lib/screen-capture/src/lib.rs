//! Platform-independent core of the capture pipeline: rectangle and rotation
//! algebra, pointer shape decoding, click indicators, the capture-session
//! seam and the multi-source coordinator.

mod capture;
mod click;
mod coordinator;
mod error;
mod geometry;
mod pointer;
mod screen_info;
mod source;
pub mod tessellation;

pub use capture::*;
pub use click::*;
pub use coordinator::*;
pub use error::*;
pub use geometry::*;
pub use pointer::*;
pub use screen_info::*;
pub use source::*;
