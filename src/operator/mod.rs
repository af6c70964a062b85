mod election;
mod health;
mod operator;
mod sync;

pub use self::operator::Operator;
pub use self::operator::OperatorConfig;
pub use self::operator::OperatorOptions;
pub use self::operator::Routed;
