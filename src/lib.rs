pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod evaluate;
pub mod imaging;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod raw;
pub mod reader;
pub mod report;
pub mod score;
pub mod select;
pub mod source;
pub mod transform;
pub mod util;
pub mod writer;

pub use error::{ConvertError, ConvertResult};
