pub use super::operations::Entity as Operations;
