pub mod approval;
pub mod expense;
