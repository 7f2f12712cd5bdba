pub mod context;
pub mod location;
pub mod recommendation;
