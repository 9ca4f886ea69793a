mod azure_data_explorer;
mod prelude;

pub use self::azure_data_explorer::*;
pub use self::prelude::{error_stage, error_type};

pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
