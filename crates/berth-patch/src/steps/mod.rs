//! Individual patch steps, applied by the engine in a fixed order

pub mod deadline;
pub mod gpu;
pub mod images;
pub mod labels;
pub mod scheduling;
pub mod security;
pub mod volumes;
