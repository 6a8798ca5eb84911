#[macro_use]
extern crate num_derive;

pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sink;
pub mod util;
