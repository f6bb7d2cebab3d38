//! Messages and stubs for the `greet.Greeter` service.

tonic::include_proto!("greet");
include!(concat!(env!("OUT_DIR"), "/greet.Greeter.rs"));

impl Greeting {
    /// Builds a greeting for `first_name` with an empty last name.
    pub fn named(first_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: String::new(),
        }
    }
}
