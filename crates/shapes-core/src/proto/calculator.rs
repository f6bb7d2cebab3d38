//! Messages and stubs for the `calculator.Calculator` service.

tonic::include_proto!("calculator");
include!(concat!(env!("OUT_DIR"), "/calculator.Calculator.rs"));
