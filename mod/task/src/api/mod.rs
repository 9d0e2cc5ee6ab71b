mod tasks;

pub use tasks::router;
