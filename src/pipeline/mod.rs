pub mod cloud;
pub mod projector;
pub mod quality;
pub mod selector;
