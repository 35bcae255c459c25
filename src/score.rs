use crate::{descriptor::Descriptor, model::CanonicalResult};

/// Number of the descriptor's required fields that are present and non-null.
pub fn score(result: &CanonicalResult, descriptor: &Descriptor) -> usize {
    descriptor
        .required_fields()
        .iter()
        .filter(|field| result.has_field(field))
        .count()
}
