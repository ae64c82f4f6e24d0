mod checkpoint_repository;

pub use checkpoint_repository::*;
