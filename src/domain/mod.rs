pub mod models;
pub mod notify;
pub mod phone;
pub mod policy;
pub mod reference;
