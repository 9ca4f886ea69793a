pub mod error_stage {
    pub const PROCESSING: &str = "processing";
    pub const SENDING: &str = "sending";
}

pub mod error_type {
    /// The error was caused by a bad configuration or a missing remote resource.
    pub const CONFIGURATION_FAILED: &str = "configuration_failed";
    /// An event could not be encoded into its wire representation.
    pub const ENCODER_FAILED: &str = "encoder_failed";
    /// A request to the remote store failed.
    pub const REQUEST_FAILED: &str = "request_failed";
    /// The operation did not complete before its deadline.
    pub const TIMED_OUT: &str = "timed_out";
    /// Releasing a resource failed.
    pub const WRITER_FAILED: &str = "writer_failed";
}
