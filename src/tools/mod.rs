pub mod abort;
pub mod ask;
pub mod listbots;
