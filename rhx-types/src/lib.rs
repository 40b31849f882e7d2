pub mod channel;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod signal;

pub use channel::*;
pub use controller::*;
pub use descriptor::*;
pub use error::*;
pub use filter::*;
pub use signal::*;
