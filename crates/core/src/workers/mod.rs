pub mod sweeper;
pub mod uploader;
pub mod worker;

pub use sweeper::*;
pub use uploader::*;
pub use worker::*;
