pub mod timing;

pub use timing::{current_request, QueryTiming};
