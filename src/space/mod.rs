pub mod configuration;
pub mod hyperparameter;
pub mod space;

pub use configuration::Configuration;
pub use hyperparameter::Hyperparameter;
pub use hyperparameter::Value;
pub use space::ConfigSpace;
