pub mod composite;
pub mod generator;
pub mod selector;

pub use composite::convert_configurations_to_array;
pub use composite::CompositeOptimizer;
pub use generator::Generator;
pub use selector::Selector;
