pub mod builder;
pub mod categories;
pub mod health;
pub mod labels;
pub mod menu;
pub mod products;
