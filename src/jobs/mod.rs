pub mod submission_pool;
