pub mod errors;
pub mod job;
pub mod params;
pub mod trial;

pub use errors::*;
pub use job::*;
pub use params::*;
pub use trial::*;
