pub mod repository;
pub mod repository_sqlx;
pub mod tracker;
