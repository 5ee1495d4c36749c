//! Domain types and pure decision rules shared by the storage layer and the
//! orchestration service.

pub mod policy;
pub mod types;

pub use types::{
    FeatureName, FeatureSettings, LiveStream, ParseError, Plan, Props, TemplateSpec, Transition,
    UserAccount,
};
