pub mod evaluate;
pub mod volume;
