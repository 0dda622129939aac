pub mod http;
pub mod ordered;
pub mod path;
pub mod range;
