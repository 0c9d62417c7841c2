mod demo;
mod health;

pub use demo::{echo, limited, protected};
pub use health::health_check;
