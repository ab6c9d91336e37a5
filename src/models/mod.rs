pub mod operation;
pub mod record;
