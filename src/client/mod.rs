pub mod codec;
pub mod error;
pub mod http;
pub mod params;
pub mod stream;

pub use error::ClientError;
