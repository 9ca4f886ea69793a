mod deadline;

pub use deadline::{Deadline, DeadlineError};
