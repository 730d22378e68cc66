//! Target labels and the immutable target data model for Tessel.

pub mod label;
pub mod target;

pub use label::Label;
pub use target::{Aggregation, Language, Outputs, Target, TargetBuilder};

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("invalid label `{label}`: {reason}")]
    InvalidLabel { label: String, reason: String },
    #[error("target {label} cannot depend on itself")]
    SelfDependency { label: String },
    #[error("target {label} lists dependency {dep} more than once in `{scope}`")]
    DuplicateDependency {
        label: String,
        dep: String,
        scope: &'static str,
    },
    #[error("target {label} has an invalid aggregation entry `{entry}`: {reason}")]
    InvalidAggregation {
        label: String,
        entry: String,
        reason: String,
    },
    #[error("target {label} enables post-processor `{name}` twice")]
    DuplicatePostProcessor { label: String, name: String },
    #[error("target {label} has two {what} named `{name}`: {first} and {second}")]
    NameCollision {
        label: String,
        what: &'static str,
        name: String,
        first: String,
        second: String,
    },
}
