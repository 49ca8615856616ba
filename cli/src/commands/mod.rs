pub mod health;
pub mod reconcile;
pub mod session;
