pub mod daemon;
pub mod quota;
pub mod utils;
