pub mod budget;
pub mod local_model;
