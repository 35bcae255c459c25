pub mod store;
pub mod types;

pub use store::DescriptorStore;
pub use types::{
    Descriptor, Extract, FormatTag, Invocation, Mapping, ParserSpec, PathPart, Preprocess,
    Validation, PATH_PLACEHOLDER,
};
