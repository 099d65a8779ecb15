pub mod init_tracer;
pub mod util;

pub use init_tracer::*;
